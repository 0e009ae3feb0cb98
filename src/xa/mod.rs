/// XA transaction-branch registry
///
/// Maps transaction-branch ids to contexts and drives the
/// start/end/prepare/commit/rollback/recover/forget state machine against
/// the backend session bound to the calling logical session. One backend
/// session serves many sequential branches of the same logical session; it
/// is reset to a clean idle state after every commit or rollback so the
/// next start finds no stale per-transaction state.
use crate::error::{PasarelaResult, XaError};
use crate::session::{SessionId, SessionRegistry};
use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Opaque transaction-branch identifier, globally unique per in-flight
/// branch. Nothing in this subsystem inspects its structure.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Xid(String);

impl Xid {
    pub fn new<S: Into<String>>(raw: S) -> Self {
        Xid(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Xid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

const TMNOFLAGS: u32 = 0;
const TMJOIN: u32 = 0x0020_0000;
const TMRESUME: u32 = 0x0800_0000;
const TMSUCCESS: u32 = 0x0400_0000;
const TMFAIL: u32 = 0x2000_0000;
const TMSUSPEND: u32 = 0x0200_0000;

/// Closed set of accepted start flags; raw wire values outside this set
/// are rejected with an invalid-flag error before any dispatch happens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartFlag {
    NoFlags,
    Join,
    Resume,
}

impl StartFlag {
    pub fn from_raw(raw: u32, xid: &Xid) -> Result<Self, XaError> {
        match raw {
            TMNOFLAGS => Ok(StartFlag::NoFlags),
            TMJOIN => Ok(StartFlag::Join),
            TMRESUME => Ok(StartFlag::Resume),
            other => Err(XaError::InvalidFlag {
                xid: xid.to_string(),
                flag: format!("{:#x}", other),
            }),
        }
    }
}

impl fmt::Display for StartFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StartFlag::NoFlags => write!(f, "NOFLAGS"),
            StartFlag::Join => write!(f, "JOIN"),
            StartFlag::Resume => write!(f, "RESUME"),
        }
    }
}

/// Accepted end flags
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndFlag {
    Success,
    Fail,
    Suspend,
}

impl EndFlag {
    pub fn from_raw(raw: u32, xid: &Xid) -> Result<Self, XaError> {
        match raw {
            TMSUCCESS => Ok(EndFlag::Success),
            TMFAIL => Ok(EndFlag::Fail),
            TMSUSPEND => Ok(EndFlag::Suspend),
            other => Err(XaError::InvalidFlag {
                xid: xid.to_string(),
                flag: format!("{:#x}", other),
            }),
        }
    }
}

/// Vote returned by prepare
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrepareVote {
    Ok,
    ReadOnly,
}

/// Branch lifecycle; terminal states are represented by removal from the
/// registry rather than a stored variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxState {
    Active,
    Ended,
    Prepared,
}

impl TxState {
    pub fn name(&self) -> &'static str {
        match self {
            TxState::Active => "ACTIVE",
            TxState::Ended => "ENDED",
            TxState::Prepared => "PREPARED",
        }
    }
}

/// Collaborator interface over the backend database's XA resource
#[async_trait]
pub trait XaResource: Send + Sync {
    async fn xa_start(&self, xid: &Xid) -> Result<(), XaError>;
    async fn xa_end(&self, xid: &Xid) -> Result<(), XaError>;
    async fn xa_prepare(&self, xid: &Xid) -> Result<PrepareVote, XaError>;
    async fn xa_commit(&self, xid: &Xid, one_phase: bool) -> Result<(), XaError>;
    async fn xa_rollback(&self, xid: &Xid) -> Result<(), XaError>;
    async fn xa_recover(&self) -> Result<Vec<Xid>, XaError>;
    async fn xa_forget(&self, xid: &Xid) -> Result<(), XaError>;

    /// Return the connection to a clean idle state after a completed
    /// branch, so the next start on the same session finds no leftover
    /// per-transaction state.
    async fn reset(&self) -> Result<(), XaError>;
}

/// Transaction context owned exclusively by the registry map. Holds the
/// session id as a non-owning reference to the backend session; the
/// logical session owns the backend itself.
#[derive(Debug, Clone)]
pub struct TxContext {
    pub xid: Xid,
    pub session_id: SessionId,
    pub state: TxState,
}

/// Server-side registry driving the XA state machine
pub struct XaTransactionRegistry {
    contexts: Arc<RwLock<HashMap<Xid, TxContext>>>,
    sessions: Arc<SessionRegistry>,
}

impl XaTransactionRegistry {
    pub fn new(sessions: Arc<SessionRegistry>) -> Self {
        Self {
            contexts: Arc::new(RwLock::new(HashMap::new())),
            sessions,
        }
    }

    /// Dispatch a start by flag. The two paths are distinct operations:
    /// NOFLAGS creates a branch, JOIN/RESUME re-enters an existing one.
    pub async fn start(
        &self,
        xid: &Xid,
        flag: StartFlag,
        session_id: &SessionId,
    ) -> PasarelaResult<()> {
        match flag {
            StartFlag::NoFlags => self.start_new_branch(xid, session_id).await,
            StartFlag::Join | StartFlag::Resume => self.rejoin_branch(xid, flag).await,
        }
    }

    /// NOFLAGS path: the logical session must already hold its bound
    /// backend (acquired at session creation, not at transaction start).
    async fn start_new_branch(&self, xid: &Xid, session_id: &SessionId) -> PasarelaResult<()> {
        let backend = self.sessions.backend(session_id).await?;

        {
            let mut contexts = self.contexts.write().await;
            if contexts.contains_key(xid) {
                return Err(XaError::DuplicateTransaction {
                    xid: xid.to_string(),
                }
                .into());
            }
            contexts.insert(
                xid.clone(),
                TxContext {
                    xid: xid.clone(),
                    session_id: session_id.clone(),
                    state: TxState::Active,
                },
            );
        }

        if let Err(e) = backend.xa_start(xid).await {
            // Backend refused the branch; drop the context we just created
            let mut contexts = self.contexts.write().await;
            contexts.remove(xid);
            return Err(e.into());
        }

        tracing::debug!("started branch {} on session {}", xid, session_id);
        Ok(())
    }

    /// JOIN/RESUME path: requires the context a prior NOFLAGS start
    /// created; never falls back to creating one.
    async fn rejoin_branch(&self, xid: &Xid, flag: StartFlag) -> PasarelaResult<()> {
        let mut contexts = self.contexts.write().await;
        let context = contexts
            .get_mut(xid)
            .ok_or_else(|| XaError::NoExistingContext {
                xid: xid.to_string(),
            })?;

        if context.state == TxState::Prepared {
            return Err(XaError::WrongState {
                xid: xid.to_string(),
                expected: "ACTIVE or ENDED",
                actual: context.state.name(),
            }
            .into());
        }

        // Reuses the bound backend session unchanged
        context.state = TxState::Active;
        tracing::debug!("branch {} re-entered via {}", xid, flag);
        Ok(())
    }

    pub async fn end(&self, xid: &Xid, flag: EndFlag) -> PasarelaResult<()> {
        let backend = {
            let mut contexts = self.contexts.write().await;
            let context = contexts
                .get_mut(xid)
                .ok_or_else(|| XaError::NoExistingContext {
                    xid: xid.to_string(),
                })?;
            if context.state != TxState::Active {
                return Err(XaError::WrongState {
                    xid: xid.to_string(),
                    expected: TxState::Active.name(),
                    actual: context.state.name(),
                }
                .into());
            }
            context.state = TxState::Ended;
            self.sessions.backend(&context.session_id).await?
        };

        backend.xa_end(xid).await?;
        tracing::debug!("ended branch {} ({:?})", xid, flag);
        Ok(())
    }

    pub async fn prepare(&self, xid: &Xid) -> PasarelaResult<PrepareVote> {
        let backend = {
            let mut contexts = self.contexts.write().await;
            let context = contexts
                .get_mut(xid)
                .ok_or_else(|| XaError::NoExistingContext {
                    xid: xid.to_string(),
                })?;
            if context.state != TxState::Ended {
                return Err(XaError::WrongState {
                    xid: xid.to_string(),
                    expected: TxState::Ended.name(),
                    actual: context.state.name(),
                }
                .into());
            }
            context.state = TxState::Prepared;
            self.sessions.backend(&context.session_id).await?
        };

        let vote = backend.xa_prepare(xid).await?;
        Ok(vote)
    }

    /// Commit a branch. Two-phase commit requires PREPARED; one-phase also
    /// accepts ENDED. On success the context leaves the registry while the
    /// backend session stays bound to its logical session, reset to a
    /// clean state for the next branch.
    pub async fn commit(&self, xid: &Xid, one_phase: bool) -> PasarelaResult<()> {
        let backend = self
            .completion_backend(xid, if one_phase { "ENDED or PREPARED" } else { "PREPARED" }, one_phase)
            .await?;

        backend.xa_commit(xid, one_phase).await?;
        self.finish_branch(xid, &backend).await;
        tracing::debug!("committed branch {} (one_phase={})", xid, one_phase);
        Ok(())
    }

    /// Roll back a branch from ENDED or PREPARED; same cleanup as commit.
    pub async fn rollback(&self, xid: &Xid) -> PasarelaResult<()> {
        let backend = self.completion_backend(xid, "ENDED or PREPARED", true).await?;

        backend.xa_rollback(xid).await?;
        self.finish_branch(xid, &backend).await;
        tracing::debug!("rolled back branch {}", xid);
        Ok(())
    }

    /// State check + backend lookup shared by commit and rollback. On a
    /// backend error later the context is left untouched for recover/forget.
    async fn completion_backend(
        &self,
        xid: &Xid,
        expected: &'static str,
        allow_ended: bool,
    ) -> PasarelaResult<Arc<dyn XaResource>> {
        let contexts = self.contexts.read().await;
        let context = contexts
            .get(xid)
            .ok_or_else(|| XaError::NoExistingContext {
                xid: xid.to_string(),
            })?;

        let ok = match context.state {
            TxState::Prepared => true,
            TxState::Ended => allow_ended,
            TxState::Active => false,
        };
        if !ok {
            return Err(XaError::WrongState {
                xid: xid.to_string(),
                expected,
                actual: context.state.name(),
            }
            .into());
        }
        Ok(self.sessions.backend(&context.session_id).await?)
    }

    /// Remove the completed context and return the backend to a clean idle
    /// state. Skipping the reset would leave stale per-transaction state
    /// that only surfaces as an error on the *next* branch's end call.
    async fn finish_branch(&self, xid: &Xid, backend: &Arc<dyn XaResource>) {
        {
            let mut contexts = self.contexts.write().await;
            contexts.remove(xid);
        }
        if let Err(e) = backend.reset().await {
            tracing::warn!("backend reset after completing {} failed: {}", xid, e);
        }
    }

    /// Administrative recovery: ask the session's backend for its in-doubt
    /// branches and re-register any that are missing as PREPARED so forget
    /// or rollback can address them. Bypasses the normal start path.
    pub async fn recover(&self, session_id: &SessionId) -> PasarelaResult<Vec<Xid>> {
        let backend = self.sessions.backend(session_id).await?;
        let in_doubt = backend.xa_recover().await?;

        let mut contexts = self.contexts.write().await;
        for xid in &in_doubt {
            contexts.entry(xid.clone()).or_insert_with(|| TxContext {
                xid: xid.clone(),
                session_id: session_id.clone(),
                state: TxState::Prepared,
            });
        }
        tracing::info!(
            "recover on session {} reported {} in-doubt branch(es)",
            session_id,
            in_doubt.len()
        );
        Ok(in_doubt)
    }

    /// Administrative forget for a heuristically completed branch
    pub async fn forget(&self, xid: &Xid) -> PasarelaResult<()> {
        let backend = {
            let contexts = self.contexts.read().await;
            let context = contexts
                .get(xid)
                .ok_or_else(|| XaError::NoExistingContext {
                    xid: xid.to_string(),
                })?;
            self.sessions.backend(&context.session_id).await?
        };

        backend.xa_forget(xid).await?;
        let mut contexts = self.contexts.write().await;
        contexts.remove(xid);
        tracing::info!("forgot branch {}", xid);
        Ok(())
    }

    pub async fn state_of(&self, xid: &Xid) -> Option<TxState> {
        let contexts = self.contexts.read().await;
        contexts.get(xid).map(|context| context.state)
    }

    pub async fn branch_count(&self) -> usize {
        let contexts = self.contexts.read().await;
        contexts.len()
    }
}
