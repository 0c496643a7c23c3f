//! Test-only scripted worker.
//!
//! Replays an ordered list of expected remote operations. Any call that does
//! not match the next expectation fails the test immediately.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::time::Duration;
use async_trait::async_trait;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::error::CheckoutError;
use crate::gateway::{CommandResult, FileTransfer, RemoteOpGateway, ShellCommand};

#[derive(Debug, Clone)]
enum Op {
    Shell { workdir: String, argv: Vec<String> },
    Stat { path: String },
    Rmdir { paths: Vec<String> },
    Cpdir { from: String, to: String },
    Push { target: String },
}

/// One expected remote operation and its scripted result
#[derive(Debug, Clone)]
pub struct Expect {
    op: Op,
    result: CommandResult,
    /// Cancel this token when the operation is served
    cancel: Option<CancellationToken>,
}

impl Expect {
    fn new(op: Op) -> Self {
        Self {
            op,
            result: CommandResult::exited(0),
            cancel: None,
        }
    }

    pub fn shell(workdir: &str, argv: &[&str]) -> Self {
        Self::new(Op::Shell {
            workdir: workdir.to_string(),
            argv: argv.iter().map(|s| s.to_string()).collect(),
        })
    }

    /// A stat; `exists` is the scripted answer
    pub fn stat(path: &str, exists: bool) -> Self {
        Self::new(Op::Stat {
            path: path.to_string(),
        })
        .exit(if exists { 0 } else { 1 })
    }

    pub fn rmdir(paths: &[&str]) -> Self {
        Self::new(Op::Rmdir {
            paths: paths.iter().map(|s| s.to_string()).collect(),
        })
    }

    pub fn cpdir(from: &str, to: &str) -> Self {
        Self::new(Op::Cpdir {
            from: from.to_string(),
            to: to.to_string(),
        })
    }

    pub fn push(target: &str) -> Self {
        Self::new(Op::Push {
            target: target.to_string(),
        })
    }

    pub fn exit(mut self, rc: i32) -> Self {
        self.result.exit_code = rc;
        self
    }

    pub fn stdout(mut self, stdout: &str) -> Self {
        self.result.stdout = Some(stdout.to_string());
        self
    }

    pub fn timeout(mut self) -> Self {
        self.result = CommandResult::timed_out();
        self
    }

    pub fn cancels(mut self, token: &CancellationToken) -> Self {
        self.cancel = Some(token.clone());
        self
    }
}

/// A local file as it was at push time
#[derive(Debug, Clone)]
pub struct Pushed {
    pub local: PathBuf,
    pub target: String,
    pub content: Vec<u8>,
}

/// Worker double driven by an expectation list
pub struct ScriptedWorker {
    expected: Mutex<VecDeque<Expect>>,
    pushed: Mutex<Vec<Pushed>>,
}

impl ScriptedWorker {
    pub fn new(expected: Vec<Expect>) -> Self {
        Self {
            expected: Mutex::new(expected.into()),
            pushed: Mutex::new(Vec::new()),
        }
    }

    /// Panics unless every expectation was consumed
    pub fn assert_done(&self) {
        let left = self.expected.lock();
        assert!(left.is_empty(), "unconsumed expectations: {:?}", left);
    }

    pub fn pushed(&self) -> Vec<Pushed> {
        self.pushed.lock().clone()
    }

    fn next(&self, got: &Op) -> CommandResult {
        let expect = self
            .expected
            .lock()
            .pop_front()
            .unwrap_or_else(|| panic!("unexpected remote operation: {:?}", got));

        let matches = match (&expect.op, got) {
            (Op::Shell { workdir: w1, argv: a1 }, Op::Shell { workdir: w2, argv: a2 }) => {
                w1 == w2 && a1 == a2
            }
            (Op::Stat { path: p1 }, Op::Stat { path: p2 }) => p1 == p2,
            (Op::Rmdir { paths: p1 }, Op::Rmdir { paths: p2 }) => p1 == p2,
            (Op::Cpdir { from: f1, to: t1 }, Op::Cpdir { from: f2, to: t2 }) => f1 == f2 && t1 == t2,
            (Op::Push { target: t1 }, Op::Push { target: t2 }) => t1 == t2,
            _ => false,
        };
        assert!(matches, "expected {:?}, got {:?}", expect.op, got);

        if let Some(token) = &expect.cancel {
            token.cancel();
        }
        expect.result
    }
}

#[async_trait]
impl RemoteOpGateway for ScriptedWorker {
    async fn run_command(&self, cmd: &ShellCommand) -> Result<CommandResult, CheckoutError> {
        let mut result = self.next(&Op::Shell {
            workdir: cmd.workdir.clone(),
            argv: cmd.argv.clone(),
        });
        if !cmd.collect_stdout {
            result.stdout = None;
        } else if result.stdout.is_none() {
            result.stdout = Some(String::new());
        }
        Ok(result)
    }

    async fn probe_path(&self, path: &str, _timeout: Duration) -> Result<bool, CheckoutError> {
        let result = self.next(&Op::Stat {
            path: path.to_string(),
        });
        Ok(result.exit_code == 0)
    }

    async fn remove_paths(&self, paths: &[String], _timeout: Duration) -> Result<i32, CheckoutError> {
        let result = self.next(&Op::Rmdir {
            paths: paths.to_vec(),
        });
        Ok(result.exit_code)
    }

    async fn copy_directory(&self, from: &str, to: &str, _timeout: Duration) -> Result<i32, CheckoutError> {
        let result = self.next(&Op::Cpdir {
            from: from.to_string(),
            to: to.to_string(),
        });
        Ok(result.exit_code)
    }
}

#[async_trait]
impl FileTransfer for ScriptedWorker {
    async fn push(&self, local: &Path, target: &str, _timeout: Duration) -> Result<i32, CheckoutError> {
        let result = self.next(&Op::Push {
            target: target.to_string(),
        });
        let content = tokio::fs::read(local).await?;
        self.pushed.lock().push(Pushed {
            local: local.to_path_buf(),
            target: target.to_string(),
            content,
        });
        Ok(result.exit_code)
    }
}
