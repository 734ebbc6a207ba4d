//! The orchestrator: wires stores, flood control, the update engine and the
//! application's main task together and runs them as one unit.

use std::future::Future;
use std::path::Path;
use std::sync::Arc;

use gapline_config::GaplineConfig;
use gapline_storage::{SessionStore, Stores};
use gapline_types::UpdateKind;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::auth::{AuthFlow, UserAuthenticator};
use crate::dispatch::{Dispatcher, Handler};
use crate::error::{AuthError, BoxError, ClientError};
use crate::gaps::{Engine, EngineConfig};
use crate::group::{ReadySignal, TaskGroup};
use crate::middleware::{FloodCallback, RateLimit, flow_control};
use crate::peers::{PeerCollector, PeerResolver};
use crate::persist::offload;
use crate::transport::{Connection, Invoker, Request, Transport, User};

/// Client tuning.
#[derive(Clone, Default)]
pub struct ClientOptions {
    pub rate_limit: RateLimit,
    pub engine: EngineConfig,
    /// Walk the dialog list into the peer cache before `main` runs.
    pub fill_peer_storage: bool,
    /// Notified whenever congestion backoff starts.
    pub on_flood_wait: Option<FloodCallback>,
}

impl ClientOptions {
    /// Options from the `[rate_limit]` and `[recovery]` sections.
    pub fn from_config(config: &GaplineConfig) -> Self {
        Self {
            rate_limit: RateLimit::from(&config.rate_limit),
            engine: EngineConfig::from(&config.recovery),
            ..Self::default()
        }
    }
}

/// Everything the application's main task gets once the client is ready.
#[derive(Clone)]
pub struct Session {
    /// The authorized account.
    pub user: User,
    /// Flood-controlled client.
    pub api: Arc<dyn Invoker>,
    pub peers: Arc<PeerResolver>,
    /// Cancelled when the run ends; long-running work should watch it.
    pub cancel: CancellationToken,
}

/// A chat client over transport `T`.
pub struct Client<T> {
    transport: Arc<T>,
    stores: Stores,
    options: ClientOptions,
    dispatcher: Dispatcher,
    authenticator: Option<Arc<dyn UserAuthenticator>>,
    cancel: CancellationToken,
}

impl<T: Transport> Client<T> {
    pub fn new(transport: T, stores: Stores) -> Self {
        Self {
            transport: Arc::new(transport),
            stores,
            options: ClientOptions::default(),
            dispatcher: Dispatcher::new(),
            authenticator: None,
            cancel: CancellationToken::new(),
        }
    }

    /// Opens the durable stores in `session_dir` and creates a client.
    pub fn open(transport: T, session_dir: impl AsRef<Path>) -> Result<Self, ClientError> {
        let stores = Stores::open(session_dir)?;
        info!(dir = %stores.dir.display(), "opened session storage");
        Ok(Self::new(transport, stores))
    }

    /// Opens the configured account's session directory and applies the
    /// configured tuning.
    pub fn from_config(transport: T, config: &GaplineConfig) -> Result<Self, ClientError> {
        Ok(Self::open(transport, config.session_dir())?
            .with_options(ClientOptions::from_config(config)))
    }

    pub fn with_options(mut self, options: ClientOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_authenticator(mut self, authenticator: Arc<dyn UserAuthenticator>) -> Self {
        self.authenticator = Some(authenticator);
        self
    }

    /// Registers the handler for updates of `kind`.
    pub fn on(&mut self, kind: UpdateKind, handler: impl Handler) -> &mut Self {
        self.dispatcher.on(kind, handler);
        self
    }

    /// Token that stops the run when cancelled.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn stores(&self) -> &Stores {
        &self.stores
    }

    /// Runs until cancelled or until a task fails.
    ///
    /// The update engine catches up first; `main` starts only after that,
    /// once the session is authorized. The run keeps processing updates
    /// after `main` returns `Ok`, until the client token is cancelled.
    pub async fn run<F, Fut>(self, main: F) -> Result<(), ClientError>
    where
        F: FnOnce(Session) -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        let Client {
            transport,
            stores,
            options,
            dispatcher,
            authenticator,
            cancel,
        } = self;

        let result = serve(
            &transport,
            &stores,
            options,
            dispatcher,
            authenticator,
            &cancel,
            main,
        )
        .await;
        let closed = close(&*transport, &stores).await;

        match (result, closed) {
            (Err(err), Err(close_err)) => {
                warn!(error = %close_err, "closing storage failed after run error");
                Err(err)
            }
            (Err(err), Ok(())) => Err(err),
            (Ok(()), closed) => closed,
        }
    }
}

async fn serve<T, F, Fut>(
    transport: &Arc<T>,
    stores: &Stores,
    options: ClientOptions,
    dispatcher: Dispatcher,
    authenticator: Option<Arc<dyn UserAuthenticator>>,
    cancel: &CancellationToken,
    main: F,
) -> Result<(), ClientError>
where
    T: Transport,
    F: FnOnce(Session) -> Fut + Send + 'static,
    Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
{
    let session = stores.session.load()?;
    let Connection { invoker, inbound } = tokio::select! {
        biased;
        () = cancel.cancelled() => return Err(ClientError::Cancelled),
        connection = transport.connect(session) => connection?,
    };
    info!("connected");

    let api = flow_control(invoker, options.rate_limit, options.on_flood_wait, cancel);
    let peers = Arc::new(PeerResolver::new(stores.peers.clone(), api.clone()));
    let engine = Engine::new(
        stores.state.clone(),
        peers.clone(),
        Arc::new(dispatcher),
        api.clone(),
        options.engine,
    );

    let ready = ReadySignal::new();
    let mut group = TaskGroup::new(cancel);
    let token = group.token();

    group.spawn("updates", engine.run(inbound, ready.clone(), token.clone()));
    group.spawn("main", {
        let transport = transport.clone();
        let sessions = stores.session.clone();
        let store = stores.peers.clone();
        let fill_peer_storage = options.fill_peer_storage;
        async move {
            ready.wait(&token).await?;
            let user = authorize(&*transport, &sessions, api.as_ref(), authenticator).await?;
            info!(user_id = user.id, bot = user.bot, "authorized");

            if fill_peer_storage {
                PeerCollector::new(store, api.clone()).dialogs().await?;
            }

            let session = Session {
                user,
                api,
                peers,
                cancel: token,
            };
            main(session).await.map_err(into_client_error)
        }
    });

    group.wait().await
}

/// Returns the current user, logging in first if the session is not
/// authorized as a user account. A fresh login's session is stored right
/// away.
async fn authorize<T: Transport>(
    transport: &T,
    sessions: &Arc<SessionStore>,
    api: &dyn Invoker,
    authenticator: Option<Arc<dyn UserAuthenticator>>,
) -> Result<User, ClientError> {
    match api.invoke(Request::GetSelf).await {
        Ok(response) => {
            let user = response.into_user()?;
            if !user.bot {
                info!("already authenticated");
                return Ok(user);
            }
            info!(user_id = user.id, "session belongs to a bot, starting user login");
        }
        Err(err) if err.is_unauthorized() => {}
        Err(err) => return Err(err.into()),
    }

    let authenticator = authenticator.ok_or(AuthError::NoAuthenticator)?;
    info!("not authorized, starting login");
    let user = AuthFlow::new(authenticator).run(api).await?;
    if let Some(blob) = transport.session().await {
        let sessions = sessions.clone();
        offload(move || sessions.store(&blob)).await?;
    }
    Ok(user)
}

/// Persists the session blob and closes the stores, reporting the first
/// failure after attempting both.
async fn close<T: Transport>(transport: &T, stores: &Stores) -> Result<(), ClientError> {
    let blob = transport.session().await;
    let stores = stores.clone();
    offload(move || {
        let saved = match blob {
            Some(blob) => stores.session.store(&blob),
            None => Ok(()),
        };
        let closed = stores.close();
        saved.and(closed)
    })
    .await?;
    info!("storage closed");
    Ok(())
}

/// Keeps a client error returned through `main` as itself.
fn into_client_error(err: BoxError) -> ClientError {
    match err.downcast::<ClientError>() {
        Ok(err) => *err,
        Err(other) => ClientError::Application(other),
    }
}
