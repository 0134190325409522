use serde::Deserialize;
use serde::Serialize;
use tokio::sync::oneshot;

use crate::BindTarget;
use crate::ErrorCode;
use crate::Result;
use crate::TransferToken;
use crate::WorkerId;

/// Outcome of an attach request as seen by the worker: a token to redeem
/// through its transport, or the OS error number that prevented one.
/// `denied` marks an `EACCES` that came from the bind permission rather than
/// from the OS.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachReply {
    pub token: Option<TransferToken>,
    pub errno: i32,
    #[serde(default)]
    pub denied: bool,
}

impl AttachReply {
    pub fn issued(token: TransferToken) -> Self {
        Self {
            token: Some(token),
            errno: 0,
            denied: false,
        }
    }

    pub fn failed(code: ErrorCode) -> Self {
        Self {
            token: None,
            errno: code.as_raw(),
            denied: false,
        }
    }

    pub fn denied() -> Self {
        Self {
            token: None,
            errno: libc::EACCES,
            denied: true,
        }
    }

    pub fn is_issued(&self) -> bool {
        self.token.is_some()
    }

    pub fn error_code(&self) -> Option<ErrorCode> {
        match self.token {
            Some(_) => None,
            None => Some(ErrorCode::from_raw(self.errno)),
        }
    }
}

/// Requests served by the coordinator loop, one at a time.
#[derive(Debug)]
pub enum WorkerRequest {
    Attach {
        worker: WorkerId,
        target: BindTarget,
        reply: oneshot::Sender<Result<AttachReply>>,
    },
    Detach {
        worker: WorkerId,
        target: BindTarget,
        reply: oneshot::Sender<bool>,
    },
    WorkerExited {
        worker: WorkerId,
        reply: oneshot::Sender<Vec<BindTarget>>,
    },
}
