//! Session gateway: owns the authenticated client of one vCenter.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use crate::api::{Connector, VcenterApi};
use crate::context::CycleContext;
use crate::error::{Error, Result};

/// Bound of the liveness check, independent of the caller's budget.
pub const ACTIVE_CHECK_TIMEOUT: Duration = Duration::from_secs(5);

/// Bound of the best-effort logout on close.
pub const LOGOUT_TIMEOUT: Duration = Duration::from_secs(3);

/// How [`Session::open`] obtained a working session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenOutcome {
    /// The existing client re-authenticated.
    Relogged,
    /// A new client replaced the old one.
    Created,
}

/// One authenticated connection to a vCenter endpoint.
pub struct Session {
    connector: Arc<dyn Connector>,
    client: Option<Arc<dyn VcenterApi>>,
    opened: u64,
}

impl Session {
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        Self {
            connector,
            client: None,
            opened: 0,
        }
    }

    /// The current client, or [`Error::NoSession`].
    pub fn client(&self) -> Result<Arc<dyn VcenterApi>> {
        self.client.clone().ok_or(Error::NoSession)
    }

    pub fn is_open(&self) -> bool {
        self.client.is_some()
    }

    /// Number of successful [`open`](Self::open) calls.
    pub fn sessions_created(&self) -> u64 {
        self.opened
    }

    /// Establish or renew the session within `timeout`, never outliving
    /// `ctx`: cancelling the cycle or reaching its deadline aborts the open.
    ///
    /// An existing client first tries to log in again; only when that fails
    /// is it closed and replaced by a freshly connected one. A new client
    /// must identify itself as a vCenter.
    pub async fn open(&mut self, ctx: &CycleContext, timeout: Duration) -> Result<OpenOutcome> {
        let ctx = ctx.with_timeout(timeout);

        if let Some(client) = self.client.clone() {
            match ctx.run(client.login()).await {
                Ok(()) => {
                    self.opened += 1;
                    info!(endpoint = client.endpoint(), "re-authenticated vCenter session");
                    return Ok(OpenOutcome::Relogged);
                }
                Err(e) => debug!(error = %e, "re-login failed, reconnecting"),
            }
            self.close().await;
        }

        let client = ctx.run(self.connector.connect()).await?;
        let about = match ctx.run(client.about()).await {
            Ok(about) => about,
            Err(e) => {
                Self::logout(client.as_ref()).await;
                return Err(e.context("could not get endpoint product information"));
            }
        };
        if !about.is_vcenter() {
            Self::logout(client.as_ref()).await;
            return Err(Error::NotVcenter(about.api_type));
        }

        info!(
            endpoint = client.endpoint(),
            version = %about.version,
            build = %about.build,
            "opened vCenter session"
        );
        self.client = Some(client);
        self.opened += 1;
        Ok(OpenOutcome::Created)
    }

    /// Check the session with a cheap round trip. Never fails; any error
    /// means inactive.
    pub async fn is_active(&self, ctx: &CycleContext) -> bool {
        let Some(client) = &self.client else {
            return false;
        };
        let check = ctx.with_timeout(ACTIVE_CHECK_TIMEOUT);
        match check.run(client.current_time()).await {
            Ok(_) => true,
            Err(e) => {
                debug!(error = %e, "vCenter session check failed");
                false
            }
        }
    }

    /// Log out and drop the client. Logout errors are ignored.
    pub async fn close(&mut self) {
        if let Some(client) = self.client.take() {
            Self::logout(client.as_ref()).await;
        }
    }

    async fn logout(client: &dyn VcenterApi) {
        let ctx = CycleContext::new(LOGOUT_TIMEOUT);
        if let Err(e) = ctx.run(client.logout()).await {
            debug!(error = %e, "ignoring vCenter logout error");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::memory::{Failure, InMemoryConnector, InMemoryVcenter, Op};

    fn session() -> (Arc<InMemoryVcenter>, Session) {
        let vc = Arc::new(InMemoryVcenter::new("vc.local"));
        vc.add_datacenter("DC1");
        let session = Session::new(Arc::new(InMemoryConnector::new(vc.clone())));
        (vc, session)
    }

    #[tokio::test]
    async fn test_no_client_before_open() {
        let (_, session) = session();
        assert!(matches!(session.client(), Err(Error::NoSession)));
        assert!(!session.is_active(&CycleContext::unbounded()).await);
    }

    #[tokio::test]
    async fn test_open_then_relogin() {
        let (vc, mut session) = session();
        let timeout = Duration::from_secs(10);

        assert_eq!(session.open(&CycleContext::unbounded(), timeout).await.unwrap(), OpenOutcome::Created);
        assert!(session.is_active(&CycleContext::unbounded()).await);
        assert_eq!(session.open(&CycleContext::unbounded(), timeout).await.unwrap(), OpenOutcome::Relogged);

        assert_eq!(vc.calls(Op::Connect), 1);
        assert_eq!(vc.calls(Op::Login), 1);
        assert_eq!(session.sessions_created(), 2);
    }

    #[tokio::test]
    async fn test_failed_relogin_reconnects() {
        let (vc, mut session) = session();
        let timeout = Duration::from_secs(10);
        session.open(&CycleContext::unbounded(), timeout).await.unwrap();

        vc.fail(Op::Login, Failure::Authentication("session expired".into()));
        vc.fail(Op::Logout, Failure::Query("not authenticated".into()));
        assert_eq!(session.open(&CycleContext::unbounded(), timeout).await.unwrap(), OpenOutcome::Created);
        assert_eq!(vc.calls(Op::Connect), 2);
        assert_eq!(vc.calls(Op::Logout), 1);
    }

    #[tokio::test]
    async fn test_rejects_non_vcenter_endpoint() {
        let (vc, mut session) = session();
        vc.set_api_type("HostAgent");
        let err = session.open(&CycleContext::unbounded(), Duration::from_secs(10)).await.unwrap_err();
        assert!(matches!(err, Error::NotVcenter(ref t) if t == "HostAgent"));
        assert!(!session.is_open());
    }

    #[tokio::test]
    async fn test_unreachable_endpoint() {
        let (vc, mut session) = session();
        vc.fail(Op::Connect, Failure::Network("no such host".into()));
        let err = session.open(&CycleContext::unbounded(), Duration::from_secs(10)).await.unwrap_err();
        assert!(err.is_fatal());
    }

    #[tokio::test(start_paused = true)]
    async fn test_liveness_check_has_its_own_timeout() {
        let (vc, mut session) = session();
        session.open(&CycleContext::unbounded(), Duration::from_secs(10)).await.unwrap();
        vc.fail(Op::CurrentTime, Failure::Hang);

        let ctx = CycleContext::new(Duration::from_secs(60));
        let started = tokio::time::Instant::now();
        assert!(!session.is_active(&ctx).await);
        assert!(started.elapsed() >= ACTIVE_CHECK_TIMEOUT);
        assert!(started.elapsed() < Duration::from_secs(60));
    }

    #[tokio::test]
    async fn test_open_honors_cancelled_cycle() {
        let (vc, mut session) = session();
        let ctx = CycleContext::new(Duration::from_secs(60));
        ctx.cancel();
        let err = session.open(&ctx, Duration::from_secs(10)).await.unwrap_err();
        assert!(matches!(err, Error::Cancelled));
        assert!(!session.is_open());
        assert_eq!(session.sessions_created(), 0);
        assert_eq!(vc.calls(Op::Connect), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_is_capped_by_cycle_deadline() {
        let (vc, mut session) = session();
        vc.fail(Op::Connect, Failure::Hang);

        let ctx = CycleContext::new(Duration::from_secs(1));
        let started = tokio::time::Instant::now();
        let err = session.open(&ctx, Duration::from_secs(30)).await.unwrap_err();
        assert!(matches!(err, Error::DeadlineExceeded));
        assert!(started.elapsed() < Duration::from_secs(30));
        assert!(!session.is_open());
    }

    #[tokio::test]
    async fn test_close_swallows_logout_errors() {
        let (vc, mut session) = session();
        session.open(&CycleContext::unbounded(), Duration::from_secs(10)).await.unwrap();
        vc.fail(Op::Logout, Failure::Network("reset by peer".into()));
        session.close().await;
        assert!(!session.is_open());
    }
}
