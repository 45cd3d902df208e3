//! Playback Coordinator
//!
//! A [`Session`] owns the node registry, every flow with its player, and a
//! worker pool that runs players in the background.
//!
//! # Asynchronous actions
//!
//! `play_flow`, `pause_flow`, `resume_flow` and `stop_flow` follow one
//! pattern: reject with a reason if the action doesn't fit the player's
//! state, otherwise subscribe a one-off callback to the transition the
//! action waits for, then act. Every callback is invoked exactly once,
//! including when the awaited transition never happens.
//!
//! The set of playing flows and the map of in-flight run handles are shared
//! with the worker tasks and guarded by mutexes. A worker removes its own
//! entries when its run ends.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::runtime::{Builder, Runtime};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::SessionConfig;
use crate::error::SessionError;
use crate::event::{Event, SubscriberId, INTERNAL_PRIORITY};
use crate::graph::{Flow, FlowSnapshot, NodeId, NodeRegistry, NodeType, SessionSnapshot, SnapshotCodec};
use crate::player::{FlowPlayer, GraphPlayer, GraphState};

/// Outcome of a requested player action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GraphActionResponse {
    /// No flow with that title.
    NoGraph,
    /// The action doesn't fit the player's current state.
    NotAllowed,
    Success,
}

/// Where `play_flow` runs the player.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlayMode {
    /// On the calling thread; returns when the run ends.
    Blocking,
    /// On the session's worker pool.
    #[default]
    Background,
}

/// Session-level notifications.
#[derive(Debug, Default)]
pub struct SessionEvents {
    pub flow_created: Event<String>,
    /// `(old, new)` title.
    pub flow_renamed: Event<(String, String)>,
    pub flow_deleted: Event<String>,
}

type Reply = Box<dyn FnOnce(GraphActionResponse, String) + Send>;

/// A callback that can be answered at most once from any thread.
#[derive(Clone)]
struct Responder(Arc<Mutex<Option<Reply>>>);

impl Responder {
    fn new<F>(callback: F) -> Self
    where
        F: FnOnce(GraphActionResponse, String) + Send + 'static,
    {
        Self(Arc::new(Mutex::new(Some(Box::new(callback)))))
    }

    fn respond(&self, response: GraphActionResponse, message: impl Into<String>) -> bool {
        let reply = self.0.lock().take();
        match reply {
            Some(reply) => {
                reply(response, message.into());
                true
            }
            None => false,
        }
    }

    fn reject(&self, response: GraphActionResponse, message: String) -> GraphActionResponse {
        warn!(?response, %message, "graph action rejected");
        self.respond(response, message);
        response
    }
}

#[derive(Clone)]
struct FlowEntry {
    flow: Arc<Mutex<Flow>>,
    player: Arc<dyn GraphPlayer>,
}

#[derive(Debug, Default)]
struct Playback {
    playing: Mutex<HashSet<String>>,
    in_flight: Mutex<HashMap<String, JoinHandle<()>>>,
}

/// Clears a run's bookkeeping when it ends.
struct RunCleanup<'a> {
    playback: &'a Playback,
    title: &'a str,
}

impl Drop for RunCleanup<'_> {
    fn drop(&mut self) {
        self.playback.in_flight.lock().remove(self.title);
        self.playback.playing.lock().remove(self.title);
    }
}

/// The top-level owner of flows and their players.
pub struct Session {
    config: SessionConfig,
    registry: Arc<NodeRegistry>,
    flows: DashMap<String, FlowEntry>,
    playback: Arc<Playback>,
    runtime: Runtime,
    events: SessionEvents,
}

impl Session {
    /// A session with default configuration.
    pub fn new() -> Result<Self, SessionError> {
        Self::with_config(SessionConfig::default())
    }

    pub fn with_config(config: SessionConfig) -> Result<Self, SessionError> {
        let mut builder = Builder::new_multi_thread();
        builder.thread_name("rivulet-worker");
        if let Some(threads) = config.worker_threads {
            builder.worker_threads(threads.max(1));
        }
        let runtime = builder.build()?;

        Ok(Self {
            config,
            registry: Arc::new(NodeRegistry::new()),
            flows: DashMap::new(),
            playback: Arc::new(Playback::default()),
            runtime,
            events: SessionEvents::default(),
        })
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<NodeRegistry> {
        &self.registry
    }

    pub fn events(&self) -> &SessionEvents {
        &self.events
    }

    pub fn register_node_type(&self, node_type: NodeType) -> bool {
        self.registry.register(node_type)
    }

    pub fn register_node_types(&self, node_types: impl IntoIterator<Item = NodeType>) {
        for node_type in node_types {
            self.registry.register(node_type);
        }
    }

    pub fn unregister_node_type(&self, identifier: &str) -> bool {
        self.registry.unregister(identifier)
    }

    // ---- Flows ----

    /// Whether `title` could name a new flow.
    pub fn new_flow_title_valid(&self, title: &str) -> bool {
        !title.trim().is_empty() && !self.flows.contains_key(title)
    }

    /// Create an empty flow titled `title`.
    pub fn create_flow(&self, title: &str) -> Result<Arc<Mutex<Flow>>, SessionError> {
        self.insert_flow(Flow::in_registry(&self.registry, title))
    }

    /// Create a flow from a snapshot, keeping the snapshot's title.
    pub fn create_flow_from(&self, snapshot: &FlowSnapshot) -> Result<Arc<Mutex<Flow>>, SessionError> {
        if !self.new_flow_title_valid(&snapshot.title) {
            return Err(self.title_error(&snapshot.title));
        }
        let flow = Flow::from_snapshot(snapshot, &self.registry)?;
        self.insert_flow(flow)
    }

    fn title_error(&self, title: &str) -> SessionError {
        if title.trim().is_empty() {
            SessionError::InvalidTitle
        } else {
            SessionError::FlowExists(title.to_owned())
        }
    }

    fn insert_flow(&self, flow: Flow) -> Result<Arc<Mutex<Flow>>, SessionError> {
        let title = flow.title().to_owned();
        if title.trim().is_empty() {
            return Err(SessionError::InvalidTitle);
        }

        let shared = Arc::new(Mutex::new(flow));
        let player: Arc<dyn GraphPlayer> = Arc::new(FlowPlayer::new(&self.config.player));
        match self.flows.entry(title.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                return Err(SessionError::FlowExists(title));
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(FlowEntry {
                    flow: Arc::clone(&shared),
                    player,
                });
            }
        }

        debug!(flow = %title, "flow created");
        self.events.flow_created.emit(&title);
        Ok(shared)
    }

    /// Rename a flow that isn't playing.
    pub fn rename_flow(&self, title: &str, new_title: &str) -> Result<(), SessionError> {
        if title == new_title {
            return Ok(());
        }
        if !self.new_flow_title_valid(new_title) {
            return Err(self.title_error(new_title));
        }
        if self.is_playing(title) {
            return Err(SessionError::FlowBusy(title.to_owned()));
        }
        let (_, entry) = self
            .flows
            .remove(title)
            .ok_or_else(|| SessionError::FlowNotFound(title.to_owned()))?;
        entry.flow.lock().rename(new_title);
        self.flows.insert(new_title.to_owned(), entry);

        self.events
            .flow_renamed
            .emit(&(title.to_owned(), new_title.to_owned()));
        Ok(())
    }

    /// Delete a flow that isn't playing.
    pub fn delete_flow(&self, title: &str) -> Result<(), SessionError> {
        if self.is_playing(title) {
            return Err(SessionError::FlowBusy(title.to_owned()));
        }
        self.flows
            .remove(title)
            .ok_or_else(|| SessionError::FlowNotFound(title.to_owned()))?;
        debug!(flow = %title, "flow deleted");
        self.events.flow_deleted.emit(&title.to_owned());
        Ok(())
    }

    /// The flow titled `title`. Its lock is held by the player while it plays.
    pub fn flow(&self, title: &str) -> Option<Arc<Mutex<Flow>>> {
        self.flows.get(title).map(|e| Arc::clone(&e.flow))
    }

    /// Flow titles, sorted.
    pub fn flow_titles(&self) -> Vec<String> {
        let mut titles: Vec<String> = self.flows.iter().map(|e| e.key().clone()).collect();
        titles.sort();
        titles
    }

    pub fn graph_player(&self, title: &str) -> Option<Arc<dyn GraphPlayer>> {
        self.flows.get(title).map(|e| Arc::clone(&e.player))
    }

    /// Run `f` on a flow that isn't playing. A playing flow's lock is held by
    /// its run, so it answers [`SessionError::FlowBusy`] instead of blocking.
    fn with_idle_flow<R>(&self, title: &str, f: impl FnOnce(&Flow) -> R) -> Result<R, SessionError> {
        let flow = self
            .flow(title)
            .ok_or_else(|| SessionError::FlowNotFound(title.to_owned()))?;
        if self.is_playing(title) {
            return Err(SessionError::FlowBusy(title.to_owned()));
        }
        let guard = match flow.try_lock() {
            Some(guard) => guard,
            None if self.is_playing(title) => return Err(SessionError::FlowBusy(title.to_owned())),
            None => flow.lock(),
        };
        let result = f(&guard);
        Ok(result)
    }

    /// Ids of every node in every flow that isn't playing.
    pub fn all_node_ids(&self) -> Vec<NodeId> {
        self.flow_titles()
            .iter()
            .filter_map(|title| self.with_idle_flow(title, Flow::node_ids).ok())
            .flatten()
            .collect()
    }

    /// Describe every flow, in title order. Fails with
    /// [`SessionError::FlowBusy`] if any flow is playing.
    pub fn snapshot(&self) -> Result<SessionSnapshot, SessionError> {
        let flows = self
            .flow_titles()
            .iter()
            .map(|title| self.with_idle_flow(title, Flow::snapshot))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(SessionSnapshot { flows })
    }

    pub fn snapshot_json(&self) -> Result<String, SessionError> {
        Ok(self.snapshot()?.to_json()?)
    }

    pub fn snapshot_msgpack(&self) -> Result<Vec<u8>, SessionError> {
        Ok(self.snapshot()?.to_msgpack()?)
    }

    /// Create a flow for each flow in `snapshot`. Returns the created titles.
    pub fn load(&self, snapshot: &SessionSnapshot) -> Result<Vec<String>, SessionError> {
        let mut titles = Vec::with_capacity(snapshot.flows.len());
        for data in &snapshot.flows {
            self.create_flow_from(data)?;
            titles.push(data.title.clone());
        }
        info!(flows = titles.len(), "session loaded");
        Ok(titles)
    }

    pub fn load_json(&self, text: &str) -> Result<Vec<String>, SessionError> {
        self.load(&SessionSnapshot::from_json(text)?)
    }

    pub fn load_msgpack(&self, bytes: &[u8]) -> Result<Vec<String>, SessionError> {
        self.load(&SessionSnapshot::from_msgpack(bytes)?)
    }

    // ---- Playback ----

    fn entry(&self, title: &str) -> Option<FlowEntry> {
        self.flows.get(title).map(|e| e.clone())
    }

    pub fn is_playing(&self, title: &str) -> bool {
        self.playback.playing.lock().contains(title)
    }

    /// Play a flow; `callback` is answered once the player enters `Playing`.
    pub fn play_flow<F>(&self, title: &str, mode: PlayMode, callback: F) -> GraphActionResponse
    where
        F: FnOnce(GraphActionResponse, String) + Send + 'static,
    {
        let responder = Responder::new(callback);
        let Some(entry) = self.entry(title) else {
            return responder.reject(
                GraphActionResponse::NoGraph,
                format!("No flow associated with name {title}"),
            );
        };

        let rejection = {
            let mut playing = self.playback.playing.lock();
            let state = entry.player.state();
            if playing.contains(title) || state == GraphState::Playing {
                Some(format!("Flow {title} is currently playing"))
            } else if state == GraphState::Paused {
                Some(format!("Flow {title} is paused"))
            } else {
                playing.insert(title.to_owned());
                None
            }
        };
        if let Some(message) = rejection {
            return responder.reject(GraphActionResponse::NotAllowed, message);
        }

        let sub = await_transition(
            &entry,
            GraphState::Playing,
            &responder,
            format!("Flow {title} is playing!"),
        );
        let title = title.to_owned();
        match mode {
            PlayMode::Blocking => run_player(&self.playback, &title, &entry, &responder, sub),
            PlayMode::Background => {
                let playback = Arc::clone(&self.playback);
                let mut in_flight = self.playback.in_flight.lock();
                let key = title.clone();
                let handle = self.runtime.spawn_blocking(move || {
                    run_player(&playback, &title, &entry, &responder, sub);
                });
                in_flight.insert(key, handle);
            }
        }
        GraphActionResponse::Success
    }

    /// Pause a playing flow; `callback` is answered on entering `Paused`.
    pub fn pause_flow<F>(&self, title: &str, callback: F) -> GraphActionResponse
    where
        F: FnOnce(GraphActionResponse, String) + Send + 'static,
    {
        let responder = Responder::new(callback);
        let Some(entry) = self.entry(title) else {
            return responder.reject(
                GraphActionResponse::NoGraph,
                format!("No flow associated with name {title}"),
            );
        };
        match entry.player.state() {
            GraphState::Paused => {
                return responder.reject(
                    GraphActionResponse::NotAllowed,
                    format!("Flow {title} already paused"),
                )
            }
            GraphState::Stopped => {
                return responder.reject(
                    GraphActionResponse::NotAllowed,
                    format!("Flow {title} isn't playing"),
                )
            }
            GraphState::Playing => {}
        }

        let sub = await_transition(
            &entry,
            GraphState::Paused,
            &responder,
            format!("Flow {title} has paused"),
        );
        entry.player.pause();
        settle_sync(&entry, GraphState::Paused, &responder, sub, title)
    }

    /// Resume a paused flow; `callback` is answered on entering `Playing`.
    pub fn resume_flow<F>(&self, title: &str, callback: F) -> GraphActionResponse
    where
        F: FnOnce(GraphActionResponse, String) + Send + 'static,
    {
        let responder = Responder::new(callback);
        let Some(entry) = self.entry(title) else {
            return responder.reject(
                GraphActionResponse::NoGraph,
                format!("No flow associated with name {title}"),
            );
        };
        if entry.player.state() != GraphState::Paused {
            return responder.reject(
                GraphActionResponse::NotAllowed,
                format!("Flow {title} is not paused"),
            );
        }

        let sub = await_transition(
            &entry,
            GraphState::Playing,
            &responder,
            format!("Flow {title} resumed"),
        );
        entry.player.resume();
        settle_sync(&entry, GraphState::Playing, &responder, sub, title)
    }

    /// Stop a playing or paused flow; `callback` is answered on entering
    /// `Stopped`, which happens on the player's thread.
    pub fn stop_flow<F>(&self, title: &str, callback: F) -> GraphActionResponse
    where
        F: FnOnce(GraphActionResponse, String) + Send + 'static,
    {
        let responder = Responder::new(callback);
        let Some(entry) = self.entry(title) else {
            return responder.reject(
                GraphActionResponse::NoGraph,
                format!("No flow associated with name {title}"),
            );
        };
        if entry.player.state() == GraphState::Stopped {
            return responder.reject(
                GraphActionResponse::NotAllowed,
                format!("Flow {title} is not playing!"),
            );
        }

        let sub = await_transition(
            &entry,
            GraphState::Stopped,
            &responder,
            format!("Flow {title} has stopped"),
        );
        entry.player.stop();
        settle_stop(&entry, &responder, sub, title);
        GraphActionResponse::Success
    }

    /// Stop every playing flow and wait for all background runs to end.
    pub fn shutdown(&self) {
        let playing: Vec<String> = self.playback.playing.lock().iter().cloned().collect();
        for title in &playing {
            if let Some(player) = self.graph_player(title) {
                player.stop();
            }
        }

        let handles: Vec<(String, JoinHandle<()>)> = self.playback.in_flight.lock().drain().collect();
        for (title, handle) in handles {
            // A run still starting up misses the first stop request.
            let player = self.graph_player(&title);
            while !handle.is_finished() {
                if let Some(player) = &player {
                    player.stop();
                }
                std::thread::sleep(self.config.player.pause_poll());
            }
            if let Err(e) = self.runtime.block_on(handle) {
                error!(flow = %title, error = %e, "background run did not finish cleanly");
            }
        }
        debug!(stopped = playing.len(), "session shut down");
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("flows", &self.flows.len())
            .field("node_types", &self.registry.len())
            .finish()
    }
}

/// Answer `responder` when the player enters `state`.
fn await_transition(
    entry: &FlowEntry,
    state: GraphState,
    responder: &Responder,
    message: String,
) -> Option<SubscriberId> {
    let responder = responder.clone();
    entry
        .player
        .events()
        .event(state)
        .subscribe_one_off(
            move |_| {
                responder.respond(GraphActionResponse::Success, message.clone());
            },
            INTERNAL_PRIORITY,
        )
        .ok()
}

fn run_player(
    playback: &Playback,
    title: &str,
    entry: &FlowEntry,
    responder: &Responder,
    sub: Option<SubscriberId>,
) {
    {
        let _cleanup = RunCleanup { playback, title };
        let mut flow = entry.flow.lock();
        if let Err(e) = entry.player.play(&mut flow) {
            error!(flow = %title, error = %e, "flow run failed");
        }
    }
    if let Some(sub) = sub {
        entry.player.events().on_play.unsubscribe(sub);
    }
    responder.respond(
        GraphActionResponse::NotAllowed,
        format!("Flow {title} did not start playing"),
    );
}

/// The run may have ended on its own before the stop subscription was made;
/// answer now rather than leave the callback waiting for the next run's stop.
fn settle_stop(entry: &FlowEntry, responder: &Responder, sub: Option<SubscriberId>, title: &str) {
    if entry.player.state() != GraphState::Stopped {
        return;
    }
    if let Some(sub) = sub {
        entry.player.events().on_stop.unsubscribe(sub);
    }
    responder.respond(GraphActionResponse::Success, format!("Flow {title} has stopped"));
}

/// Answer a callback whose transition should have happened synchronously.
fn settle_sync(
    entry: &FlowEntry,
    state: GraphState,
    responder: &Responder,
    sub: Option<SubscriberId>,
    title: &str,
) -> GraphActionResponse {
    if let Some(sub) = sub {
        entry.player.events().event(state).unsubscribe(sub);
    }
    if responder.respond(
        GraphActionResponse::NotAllowed,
        format!("Flow {title} changed state concurrently"),
    ) {
        return GraphActionResponse::NotAllowed;
    }
    GraphActionResponse::Success
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::emitter;

    fn recorder() -> (
        Arc<Mutex<Vec<(GraphActionResponse, String)>>>,
        impl Fn() -> Box<dyn FnOnce(GraphActionResponse, String) + Send>,
    ) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let sink = log.clone();
        let make = move || {
            let sink = sink.clone();
            Box::new(move |r, m| sink.lock().push((r, m))) as Box<dyn FnOnce(GraphActionResponse, String) + Send>
        };
        (log, make)
    }

    #[test]
    fn titles_must_be_unique_and_non_empty() {
        let session = Session::new().unwrap();
        session.create_flow("main").unwrap();
        assert!(matches!(session.create_flow("main"), Err(SessionError::FlowExists(_))));
        assert!(matches!(session.create_flow("  "), Err(SessionError::InvalidTitle)));

        session.rename_flow("main", "renamed").unwrap();
        assert!(session.flow("main").is_none());
        assert_eq!(session.flow("renamed").unwrap().lock().title(), "renamed");

        session.delete_flow("renamed").unwrap();
        assert!(matches!(session.delete_flow("renamed"), Err(SessionError::FlowNotFound(_))));
    }

    #[test]
    fn unknown_flow_answers_callback() {
        let session = Session::new().unwrap();
        let (log, make) = recorder();

        assert_eq!(session.play_flow("nope", PlayMode::Blocking, make()), GraphActionResponse::NoGraph);
        assert_eq!(session.pause_flow("nope", make()), GraphActionResponse::NoGraph);
        assert_eq!(session.stop_flow("nope", make()), GraphActionResponse::NoGraph);
        assert_eq!(log.lock().len(), 3);
        assert!(log.lock().iter().all(|(r, _)| *r == GraphActionResponse::NoGraph));
    }

    #[test]
    fn blocking_play_runs_to_completion() {
        let session = Session::new().unwrap();
        let flow = session.create_flow("main").unwrap();
        flow.lock().create_node(&emitter(1)).unwrap();
        let (log, make) = recorder();

        let response = session.play_flow("main", PlayMode::Blocking, make());
        assert_eq!(response, GraphActionResponse::Success);
        assert_eq!(
            *log.lock(),
            vec![(GraphActionResponse::Success, "Flow main is playing!".to_owned())]
        );
        assert!(!session.is_playing("main"));

        assert_eq!(session.stop_flow("main", make()), GraphActionResponse::NotAllowed);
        assert_eq!(session.resume_flow("main", make()), GraphActionResponse::NotAllowed);
    }

    #[test]
    fn session_snapshot_round_trip() {
        let session = Session::new().unwrap();
        session.register_node_type(emitter(1));
        let flow = session.create_flow("main").unwrap();
        flow.lock().create_node_by_id(session.registry(), "test.emit").unwrap();

        let snapshot = session.snapshot().unwrap();
        let other = Session::new().unwrap();
        other.register_node_type(emitter(1));
        assert_eq!(other.load(&snapshot).unwrap(), vec!["main".to_owned()]);
        assert_eq!(other.all_node_ids().len(), 1);
        assert!(matches!(other.load(&snapshot), Err(SessionError::FlowExists(_))));
    }

    #[test]
    fn session_codecs_report_their_errors() {
        let session = Session::new().unwrap();
        session.register_node_type(emitter(1));
        let flow = session.create_flow("main").unwrap();
        flow.lock().create_node_by_id(session.registry(), "test.emit").unwrap();

        let json = session.snapshot_json().unwrap();
        let bytes = session.snapshot_msgpack().unwrap();

        let from_json = Session::new().unwrap();
        from_json.register_node_type(emitter(1));
        assert_eq!(from_json.load_json(&json).unwrap(), vec!["main".to_owned()]);

        let from_bytes = Session::new().unwrap();
        from_bytes.register_node_type(emitter(1));
        assert_eq!(from_bytes.load_msgpack(&bytes).unwrap(), vec!["main".to_owned()]);
        assert_eq!(from_bytes.all_node_ids().len(), 1);

        assert!(matches!(session.load_json("{ nope"), Err(SessionError::Json(_))));
        assert!(matches!(session.load_msgpack(&[0xc1]), Err(SessionError::MsgPackDecode(_))));
    }

    /// A run that ended before the stop subscription existed still answers
    /// the stop callback, and leaves nothing subscribed for the next run.
    #[test]
    fn stop_after_run_ended_answers_once() {
        let session = Session::new().unwrap();
        session.create_flow("main").unwrap();
        let entry = session.entry("main").unwrap();
        let (log, make) = recorder();
        let responder = Responder::new(make());

        let sub = await_transition(
            &entry,
            GraphState::Stopped,
            &responder,
            "Flow main has stopped".to_owned(),
        );
        assert!(sub.is_some());
        settle_stop(&entry, &responder, sub, "main");

        assert_eq!(
            *log.lock(),
            vec![(GraphActionResponse::Success, "Flow main has stopped".to_owned())]
        );
        assert!(entry.player.events().on_stop.is_empty());

        let mut flow = entry.flow.lock();
        entry.player.play(&mut flow).unwrap();
        assert_eq!(log.lock().len(), 1);
    }
}
