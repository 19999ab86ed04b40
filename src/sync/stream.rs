use std::time::Duration;

use thiserror::Error;
use tokio::{
    sync::{
        broadcast::{self, error::RecvError},
        mpsc, oneshot, watch,
    },
    time::{interval_at, Instant, Interval, MissedTickBehavior},
};
use uuid::Uuid;

use crate::{
    appresult::{AppError, AppResult},
    db::{Change, Message},
    deletion::{self, Actor, DeleteScope},
    media::{self, Attachment, MediaFile},
    messages,
    session::SessionContext,
    AppState,
};

use super::{Entry, RoomView};

/// A send that did not make it to the store. The provisional message has
/// already been taken back out of the view.
#[derive(Debug, Error)]
#[error("message was not sent: {error}")]
pub struct SendFailure {
    /// The text as it was typed.
    pub draft: String,
    #[source]
    pub error: AppError,
}

type Reply<T> = oneshot::Sender<T>;

enum Command {
    Send { content: String, reply_to: Option<Uuid>, reply: Reply<Result<Message, SendFailure>> },
    Attach { file: MediaFile, reply_to: Option<Uuid>, reply: Reply<AppResult<Message>> },
    Delete { id: Uuid, scope: DeleteScope, reply: Reply<AppResult<Vec<Uuid>>> },
    Refresh { reply: Reply<()> },
}

/// Results of store calls spawned off the loop.
enum Completion {
    Polled { checkpoint: u64, result: AppResult<Vec<Message>>, reply: Option<Reply<()>> },
    Sent { local: Uuid, draft: String, result: AppResult<Message>, reply: Reply<Result<Message, SendFailure>> },
    Attached { result: AppResult<Message>, reply: Reply<AppResult<Message>> },
    Deleted { result: AppResult<Vec<Uuid>>, reply: Reply<AppResult<Vec<Uuid>>> },
}

/// A member's live view of one void.
///
/// Handles are cheap to clone and all drive the same task. The task stops,
/// taking its poll and sweep timers with it, once the last handle is dropped.
#[derive(Clone)]
pub struct MessageStream {
    void_id: Uuid,
    member_id: Uuid,
    commands: mpsc::UnboundedSender<Command>,
    view: watch::Receiver<RoomView>,
}

impl MessageStream {
    /// Loads the live messages of `void_id` and starts following it as the
    /// member `session` holds there. A failed initial load is logged and the
    /// stream starts empty.
    pub async fn open(state: AppState, session: &SessionContext, void_id: Uuid) -> AppResult<Self> {
        let actor = Actor::in_void(session, void_id);
        let member_id = actor.member_id.ok_or(AppError::NoPermission)?;

        // subscribe before loading so nothing falls between the two
        let feed = state.store.subscribe();
        let mut view = RoomView::new();
        let checkpoint = view.checkpoint();
        let now = state.clock.now();
        match state.store.live_messages(void_id, now).await {
            Ok(messages) => {
                view.merge_poll(checkpoint, messages, now);
            }
            Err(e) => tracing::warn!("initial load of void {void_id} failed: {e}"),
        }

        let (view_tx, view) = watch::channel(view);
        let (commands, commands_rx) = mpsc::unbounded_channel();
        let (done, done_rx) = mpsc::unbounded_channel();
        let synchronizer = Synchronizer { void_id, actor, member_id, state, view: view_tx, done };
        tokio::spawn(synchronizer.run(commands_rx, done_rx, feed));

        Ok(Self { void_id, member_id, commands, view })
    }

    pub fn void_id(&self) -> Uuid {
        self.void_id
    }

    pub fn member_id(&self) -> Uuid {
        self.member_id
    }

    async fn call<T>(&self, command: impl FnOnce(Reply<T>) -> Command) -> Option<T> {
        let (reply, rx) = oneshot::channel();
        self.commands.send(command(reply)).ok()?;
        rx.await.ok()
    }

    /// Sends a text message. It shows up in the view at once as pending and
    /// is confirmed in place when the store accepts it.
    pub async fn send(&self, content: impl Into<String>, reply_to: Option<Uuid>) -> Result<Message, SendFailure> {
        let content = content.into();
        let draft = content.clone();
        match self.call(|reply| Command::Send { content, reply_to, reply }).await {
            Some(result) => result,
            None => Err(SendFailure { draft, error: closed() }),
        }
    }

    pub async fn attach(&self, file: MediaFile, reply_to: Option<Uuid>) -> AppResult<Message> {
        self.call(|reply| Command::Attach { file, reply_to, reply }).await.unwrap_or_else(|| Err(closed()))
    }

    /// Deletes a message. [`DeleteScope::Local`] only hides it here; otherwise
    /// it goes from the store along with its replies. Returns the ids removed.
    pub async fn delete(&self, id: Uuid, scope: DeleteScope) -> AppResult<Vec<Uuid>> {
        self.call(|reply| Command::Delete { id, scope, reply }).await.unwrap_or_else(|| Err(closed()))
    }

    /// Polls right away and returns once the result has been merged.
    pub async fn refresh(&self) {
        self.call(|reply| Command::Refresh { reply }).await;
    }

    pub fn messages(&self) -> Vec<Message> {
        self.view.borrow().messages().cloned().collect()
    }

    pub fn entries(&self) -> Vec<Entry> {
        self.view.borrow().entries().to_vec()
    }

    /// The message `message` replies to, unless it is no longer held.
    pub fn reply_target(&self, message: &Message) -> Option<Message> {
        self.view.borrow().reply_target(message).cloned()
    }

    pub fn subscribe(&self) -> watch::Receiver<RoomView> {
        self.view.clone()
    }

    /// Waits until the view satisfies `ready`; false if the stream stopped.
    pub async fn wait_for(&self, ready: impl FnMut(&RoomView) -> bool) -> bool {
        self.view.clone().wait_for(ready).await.is_ok()
    }
}

fn closed() -> AppError {
    AppError::StoreUnavailable(anyhow::anyhow!("message stream stopped"))
}

fn ticker(period: Duration) -> Interval {
    let mut interval = interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}

async fn next_change(feed: &mut Option<broadcast::Receiver<Change>>) -> Result<Change, RecvError> {
    match feed {
        Some(feed) => feed.recv().await,
        None => std::future::pending().await,
    }
}

/// The task behind a [`MessageStream`]. Every change to the view happens on
/// its loop.
struct Synchronizer {
    void_id: Uuid,
    actor: Actor,
    member_id: Uuid,
    state: AppState,
    view: watch::Sender<RoomView>,
    done: mpsc::UnboundedSender<Completion>,
}

impl Synchronizer {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut done: mpsc::UnboundedReceiver<Completion>,
        mut feed: Option<broadcast::Receiver<Change>>,
    ) {
        let settings = self.state.config.settings;
        let mut poll = ticker(settings.poll_interval);
        let mut sweep = ticker(settings.sweep_interval);
        tracing::debug!("following void {} as {}", self.void_id, self.member_id);

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => self.handle(command),
                    None => break,
                },
                Some(completion) = done.recv() => self.complete(completion),
                change = next_change(&mut feed) => self.ingest(change, &mut feed),
                _ = poll.tick() => self.poll(None),
                _ = sweep.tick() => self.sweep(),
            }
        }
        tracing::debug!("stopped following void {}", self.void_id);
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::Send { content, reply_to, reply } => self.send(content, reply_to, reply),
            Command::Attach { file, reply_to, reply } => self.attach(file, reply_to, reply),
            Command::Delete { id, scope: DeleteScope::Local, reply } => {
                self.view.send_if_modified(|view| view.hide(id));
                let _ = reply.send(Ok(vec![id]));
            }
            Command::Delete { id, scope: DeleteScope::Authoritative, reply } => self.delete(id, reply),
            Command::Refresh { reply } => self.poll(Some(reply)),
        }
    }

    fn complete(&mut self, completion: Completion) {
        match completion {
            Completion::Polled { checkpoint, result, reply } => {
                match result {
                    Ok(messages) => {
                        let now = self.state.clock.now();
                        self.view.send_if_modified(|view| view.merge_poll(checkpoint, messages, now));
                    }
                    Err(e) => tracing::warn!("poll of void {} failed: {e}", self.void_id),
                }
                if let Some(reply) = reply {
                    let _ = reply.send(());
                }
            }
            Completion::Sent { local, draft, result, reply } => {
                let result = match result {
                    Ok(message) => {
                        self.view.send_modify(|view| view.confirm(local, message.clone()));
                        Ok(message)
                    }
                    Err(error) => {
                        tracing::warn!("send to void {} failed: {error}", self.void_id);
                        self.view.send_modify(|view| {
                            view.reject(local);
                        });
                        Err(SendFailure { draft, error })
                    }
                };
                let _ = reply.send(result);
            }
            Completion::Attached { result, reply } => {
                if let Ok(message) = &result {
                    let now = self.state.clock.now();
                    self.view.send_if_modified(|view| view.apply_insert(message.clone(), now));
                }
                let _ = reply.send(result);
            }
            Completion::Deleted { result, reply } => {
                if let Ok(ids) = &result {
                    self.view.send_if_modified(|view| {
                        let mut changed = false;
                        for id in ids {
                            changed |= !view.remove(*id).is_empty();
                        }
                        changed
                    });
                }
                let _ = reply.send(result);
            }
        }
    }

    fn ingest(&mut self, change: Result<Change, RecvError>, feed: &mut Option<broadcast::Receiver<Change>>) {
        match change {
            Ok(change) if change.void_id() != self.void_id => {}
            Ok(Change::Inserted { message }) => {
                tracing::debug!("feed: message {} in void {}", message.id, self.void_id);
                let now = self.state.clock.now();
                self.view.send_if_modified(|view| view.apply_insert(message, now));
            }
            Ok(Change::Deleted { id, .. }) => {
                tracing::debug!("feed: message {id} deleted in void {}", self.void_id);
                self.view.send_if_modified(|view| !view.remove(id).is_empty());
            }
            Err(RecvError::Lagged(missed)) => {
                tracing::warn!("feed for void {} skipped {missed} changes, polling", self.void_id);
                self.poll(None);
            }
            Err(RecvError::Closed) => {
                tracing::warn!("feed for void {} closed, falling back to polling", self.void_id);
                *feed = None;
            }
        }
    }

    /// Fetches the live messages off the loop. Ticks may overlap; each
    /// result is merged against its own checkpoint.
    fn poll(&mut self, reply: Option<Reply<()>>) {
        let checkpoint = self.view.borrow().checkpoint();
        let store = self.state.store.clone();
        let now = self.state.clock.now();
        let void_id = self.void_id;
        let done = self.done.clone();
        tokio::spawn(async move {
            let result = store.live_messages(void_id, now).await;
            let _ = done.send(Completion::Polled { checkpoint, result, reply });
        });
    }

    fn sweep(&mut self) {
        let now = self.state.clock.now();
        self.view.send_if_modified(|view| view.sweep(now) > 0);
    }

    fn send(&mut self, content: String, reply_to: Option<Uuid>, reply: Reply<Result<Message, SendFailure>>) {
        let local = Uuid::now_v7();
        let ttl = self.state.config.settings.message_ttl;
        let now = self.state.clock.now();
        let new = match messages::compose(self.void_id, self.member_id, &content, reply_to, Some(local), now, ttl) {
            Ok(new) => new,
            Err(error) => {
                let _ = reply.send(Err(SendFailure { draft: content, error }));
                return;
            }
        };
        self.view.send_modify(|view| view.push_pending(new.clone().into_message(local)));

        let store = self.state.store.clone();
        let done = self.done.clone();
        tokio::spawn(async move {
            let result = store.insert_message(new).await;
            let _ = done.send(Completion::Sent { local, draft: content, result, reply });
        });
    }

    fn attach(&mut self, file: MediaFile, reply_to: Option<Uuid>, reply: Reply<AppResult<Message>>) {
        let attachment = Attachment { void_id: self.void_id, member_id: self.member_id, reply_to, client_ref: None };
        let state = self.state.clone();
        let done = self.done.clone();
        tokio::spawn(async move {
            let ttl = state.config.settings.message_ttl;
            let result =
                media::upload(&*state.store, &*state.storage, &*state.clock, ttl, attachment, file).await;
            let _ = done.send(Completion::Attached { result, reply });
        });
    }

    fn delete(&mut self, id: Uuid, reply: Reply<AppResult<Vec<Uuid>>>) {
        let actor = self.actor;
        let state = self.state.clone();
        let done = self.done.clone();
        tokio::spawn(async move {
            let result = deletion::delete_message(&*state.store, &*state.storage, id, actor).await;
            let _ = done.send(Completion::Deleted { result, reply });
        });
    }
}
