//! Session actor: one Tokio task that owns a [`SessionClient`] and its
//! receiver.
//!
//! Same shape as the engine actor, with a third branch in the `select!`:
//! a `tokio::time::interval` that drives the announce timeout and the
//! liveness ping even when no datagrams arrive.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use sigwire_transport::{ActiveFlag, Receiver};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::{SessionClient, SessionConfig, SessionError, SessionHooks, SessionInfo};

type Reply<T> = oneshot::Sender<Result<T, SessionError>>;

/// Commands sent to a session actor through its channel.
pub(crate) enum SessionCommand {
    Announce { reply: Reply<usize> },
    SetDirty { dirty: bool, reply: Reply<bool> },
    Progress { fraction: f32, reply: Reply<bool> },
    Message { priority: i32, text: String, reply: Reply<bool> },
    SetGuiVisible { visible: bool, reply: Reply<bool> },
    GetInfo { reply: oneshot::Sender<SessionInfo> },
    Shutdown,
}

/// Handle to a running session actor.
///
/// Cheap to clone. [`is_active`](Self::is_active) reads the shared flag
/// directly and never waits on the actor.
#[derive(Clone)]
pub struct SessionHandle {
    app_name: String,
    url: String,
    active: ActiveFlag,
    sender: mpsc::Sender<SessionCommand>,
    task: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl SessionHandle {
    pub fn app_name(&self) -> &str {
        &self.app_name
    }

    /// The client's own URL, fixed at bind time.
    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn is_active(&self) -> bool {
        self.active.get()
    }

    async fn request<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> SessionCommand) -> Result<T, SessionError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.sender
            .send(make(reply_tx))
            .await
            .map_err(|_| SessionError::Unavailable)?;
        reply_rx.await.map_err(|_| SessionError::Unavailable)
    }

    /// Sends the announce. The reply arrives later; poll
    /// [`is_active`](Self::is_active) or [`info`](Self::info).
    pub async fn announce(&self) -> Result<usize, SessionError> {
        self.request(|reply| SessionCommand::Announce { reply }).await?
    }

    pub async fn set_dirty(&self, dirty: bool) -> Result<bool, SessionError> {
        self.request(|reply| SessionCommand::SetDirty { dirty, reply }).await?
    }

    pub async fn progress(&self, fraction: f32) -> Result<bool, SessionError> {
        self.request(|reply| SessionCommand::Progress { fraction, reply }).await?
    }

    pub async fn message(&self, priority: i32, text: impl Into<String>) -> Result<bool, SessionError> {
        let text = text.into();
        self.request(|reply| SessionCommand::Message { priority, text, reply })
            .await?
    }

    pub async fn set_gui_visible(&self, visible: bool) -> Result<bool, SessionError> {
        self.request(|reply| SessionCommand::SetGuiVisible { visible, reply })
            .await?
    }

    pub async fn info(&self) -> Result<SessionInfo, SessionError> {
        self.request(|reply| SessionCommand::GetInfo { reply }).await
    }

    /// Asks the actor to close the session and stop. The batch in flight
    /// is finished first.
    pub async fn shutdown(&self) -> Result<(), SessionError> {
        self.sender
            .send(SessionCommand::Shutdown)
            .await
            .map_err(|_| SessionError::Unavailable)
    }

    /// Waits for the actor task to end. Only the first caller waits;
    /// later calls return at once.
    pub async fn join(&self) {
        let task = self.task.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                tracing::error!(app = %self.app_name, error = %e, "session task failed");
            }
        }
    }
}

/// The internal actor state. Runs inside a Tokio task.
struct SessionActor<H> {
    client: SessionClient<H>,
    receiver: Receiver,
    commands: mpsc::Receiver<SessionCommand>,
    poll: Duration,
}

impl<H: SessionHooks> SessionActor<H> {
    async fn run(mut self) {
        tracing::info!(url = %self.client.url(), "session actor started");

        let mut checks = tokio::time::interval(self.poll);
        checks.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                cmd = self.commands.recv() => match cmd {
                    Some(SessionCommand::Shutdown) | None => break,
                    Some(cmd) => self.handle_command(cmd),
                },
                batch = self.receiver.wait(self.poll) => {
                    self.client.dispatch_batch(&batch);
                }
                now = checks.tick() => self.client.tick(now),
            }
        }

        self.client.close();
        self.client.disconnect();
        tracing::info!("session actor stopped");
    }

    fn handle_command(&mut self, cmd: SessionCommand) {
        let client = &mut self.client;
        match cmd {
            SessionCommand::Announce { reply } => {
                let _ = reply.send(client.announce());
            }
            SessionCommand::SetDirty { dirty, reply } => {
                let _ = reply.send(client.set_dirty(dirty));
            }
            SessionCommand::Progress { fraction, reply } => {
                let _ = reply.send(client.progress(fraction));
            }
            SessionCommand::Message { priority, text, reply } => {
                let _ = reply.send(client.message(priority, &text));
            }
            SessionCommand::SetGuiVisible { visible, reply } => {
                let _ = reply.send(client.set_gui_visible(visible));
            }
            SessionCommand::GetInfo { reply } => {
                let _ = reply.send(client.info().clone());
            }
            SessionCommand::Shutdown => {}
        }
    }
}

/// Binds a session client and spawns its actor. Does not announce; call
/// [`SessionHandle::announce`] when the application is ready.
///
/// # Errors
/// [`SessionError::Transport`] if the socket can't be bound or the
/// coordinator URL doesn't resolve.
pub async fn spawn_session<H: SessionHooks>(config: SessionConfig, hooks: H) -> Result<SessionHandle, SessionError> {
    let config = config.validated();
    let (client, receiver) = SessionClient::bind(&config, hooks).await?;
    Ok(spawn_client(client, receiver, &config))
}

/// Spawns an actor around an already-built client.
pub fn spawn_client<H: SessionHooks>(client: SessionClient<H>, receiver: Receiver, config: &SessionConfig) -> SessionHandle {
    let (tx, rx) = mpsc::channel(config.channel_size.max(1));
    let handle = SessionHandle {
        app_name: config.app_name.clone(),
        url: client.url(),
        active: client.endpoint().active().clone(),
        sender: tx,
        task: Arc::new(Mutex::new(None)),
    };

    let actor = SessionActor {
        client,
        receiver,
        commands: rx,
        poll: config.poll_interval().max(Duration::from_millis(1)),
    };
    let task = tokio::spawn(actor.run());
    *handle.task.lock().unwrap_or_else(PoisonError::into_inner) = Some(task);
    handle
}
