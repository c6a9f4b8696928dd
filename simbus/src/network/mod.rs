//! The fabric itself: endpoint/server registry, request pump and the
//! per-call delivery state machine.
//!
//! One [`Network`] hosts any number of named servers and client endpoints
//! in a single process. Every call flows through the same pipeline:
//!
//! ```text
//! ClientEnd::call ──▶ inbound channel ──▶ pump ──▶ delivery task (per call)
//!                                                    │
//!                                    ┌───────────────┼──────────────────┐
//!                                    ▼               ▼                  ▼
//!                               black-hole     drop/delay          dispatch task
//!                               (unreachable)  (unreliable)        (runs the method)
//!                                    │               │                  │
//!                                    └───────────────┴───────▶ private reply channel
//! ```
//!
//! The delivery task owns the call's fate: it snapshots the endpoint's
//! routing state once, injects whatever faults the knobs call for, races
//! the dispatched method against a liveness poll, and posts exactly one
//! outcome to the caller's private channel.

use std::collections::HashMap;
use std::ops::Range;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tokio::sync::{mpsc, oneshot};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use crate::client::ClientEnd;
use crate::message::{ReplyMessage, RequestMessage};
use crate::names::{EndpointName, ServerName};
use crate::server::Server;

pub mod config;

pub use config::FaultProfile;
use config::sample_duration;

/// An in-process simulated network.
///
/// Must be created inside a Tokio runtime: the constructor spawns the
/// request pump. The handle is cheap to clone; [`cleanup`](Self::cleanup)
/// tears the fabric down for all clones.
#[derive(Clone)]
pub struct Network {
    core: Arc<Core>,
}

struct Core {
    profile: FaultProfile,
    state: Mutex<State>,
    rng: Mutex<ChaCha8Rng>,
    /// Requests that entered the pump.
    total_count: AtomicU64,
    /// Request bytes at ingest plus reply bytes at actual delivery.
    total_bytes: AtomicU64,
    requests: mpsc::Sender<RequestMessage>,
    done: CancellationToken,
}

/// Everything the mutex guards: routing tables and the three knobs.
struct State {
    reliable: bool,
    long_delays: bool,
    long_reordering: bool,
    ends: HashMap<EndpointName, ClientEnd>,
    enabled: HashMap<EndpointName, bool>,
    /// `None` marks a deleted server; the name stays claimed so in-flight
    /// identity checks keep failing rather than missing.
    servers: HashMap<ServerName, Option<Arc<Server>>>,
    connections: HashMap<EndpointName, Option<ServerName>>,
}

/// Consistent view of one endpoint's routing state, captured under the
/// mutex at the start of delivery. The captured `Arc` pins the server
/// *object*: replacing the server under the same name makes this call's
/// liveness checks fail.
struct EndpointSnapshot {
    enabled: bool,
    servername: Option<ServerName>,
    server: Option<Arc<Server>>,
    reliable: bool,
    long_reordering: bool,
}

impl Network {
    /// Create a reliable network with all fault injection off and an
    /// OS-seeded RNG.
    pub fn new() -> Self {
        Self::build(FaultProfile::default(), ChaCha8Rng::from_os_rng())
    }

    /// Create a network whose fault injection is driven by a deterministic
    /// seed, for reproducible failure schedules.
    pub fn with_seed(seed: u64) -> Self {
        Self::build(FaultProfile::default(), ChaCha8Rng::seed_from_u64(seed))
    }

    /// Create a network with a custom fault profile.
    pub fn with_profile(profile: FaultProfile) -> Self {
        Self::build(profile, ChaCha8Rng::from_os_rng())
    }

    fn build(profile: FaultProfile, rng: ChaCha8Rng) -> Self {
        let (requests, inbound) = mpsc::channel(1);
        let core = Arc::new(Core {
            profile,
            state: Mutex::new(State {
                reliable: true,
                long_delays: false,
                long_reordering: false,
                ends: HashMap::new(),
                enabled: HashMap::new(),
                servers: HashMap::new(),
                connections: HashMap::new(),
            }),
            rng: Mutex::new(rng),
            total_count: AtomicU64::new(0),
            total_bytes: AtomicU64::new(0),
            requests,
            done: CancellationToken::new(),
        });
        tokio::spawn(Core::pump(core.clone(), inbound));
        Network { core }
    }

    /// Tear the fabric down. The pump stops; calls that have not yet
    /// entered the pump return `false`. Calls already being delivered keep
    /// their delivery tasks and resolve normally.
    pub fn cleanup(&self) {
        self.core.done.cancel();
    }

    /// Create a named endpoint. New endpoints start disabled and
    /// unconnected.
    ///
    /// # Panics
    ///
    /// Panics if the name is already taken; endpoint names are unique for
    /// the life of a network.
    pub fn make_end(&self, name: impl Into<EndpointName>) -> ClientEnd {
        let name = name.into();
        let mut st = self.core.state_lock();
        if st.ends.contains_key(&name) {
            panic!("simbus: make_end: endpoint `{name}` already exists");
        }
        let end = ClientEnd::new(
            name.clone(),
            self.core.requests.clone(),
            self.core.done.clone(),
        );
        st.ends.insert(name.clone(), end.clone());
        st.enabled.insert(name.clone(), false);
        st.connections.insert(name, None);
        end
    }

    /// Install a server under a name, replacing any previous holder.
    /// In-flight calls pinned to a replaced server object will fail.
    pub fn add_server(&self, name: impl Into<ServerName>, server: Arc<Server>) {
        let mut st = self.core.state_lock();
        st.servers.insert(name.into(), Some(server));
    }

    /// Remove a server. The name stays claimed; calls routed at it fail
    /// until a server is installed again.
    pub fn delete_server(&self, name: impl Into<ServerName>) {
        let mut st = self.core.state_lock();
        st.servers.insert(name.into(), None);
    }

    /// Route an endpoint at a server name. The latest connection wins.
    pub fn connect(&self, end: impl Into<EndpointName>, server: impl Into<ServerName>) {
        let mut st = self.core.state_lock();
        st.connections.insert(end.into(), Some(server.into()));
    }

    /// Enable or disable an endpoint. A disabled endpoint's calls
    /// black-hole.
    pub fn enable(&self, end: impl Into<EndpointName>, enabled: bool) {
        let mut st = self.core.state_lock();
        st.enabled.insert(end.into(), enabled);
    }

    /// Toggle reliable delivery. Unreliable networks delay every request
    /// and drop a fraction of requests and replies.
    pub fn set_reliable(&self, reliable: bool) {
        self.core.state_lock().reliable = reliable;
    }

    /// Toggle long reply reordering: most replies get deferred long enough
    /// to arrive well out of order.
    pub fn set_long_reordering(&self, long_reordering: bool) {
        self.core.state_lock().long_reordering = long_reordering;
    }

    /// Toggle long black-hole delays for unreachable calls.
    pub fn set_long_delays(&self, long_delays: bool) {
        self.core.state_lock().long_delays = long_delays;
    }

    /// Requests received by the live server registered under `name`.
    ///
    /// # Panics
    ///
    /// Panics if no live server holds the name. Asking is a test bug.
    pub fn server_count(&self, name: impl Into<ServerName>) -> u64 {
        let name = name.into();
        let server = {
            let st = self.core.state_lock();
            st.servers.get(&name).cloned()
        };
        match server {
            Some(Some(server)) => server.request_count(),
            _ => panic!("simbus: server_count: no live server `{name}`"),
        }
    }

    /// Total requests that entered the pump.
    pub fn total_count(&self) -> u64 {
        self.core.total_count.load(Ordering::Relaxed)
    }

    /// Total bytes moved: request frames at ingest, reply frames at the
    /// moment they are actually delivered (deferred replies count late;
    /// dropped replies never count).
    pub fn total_bytes(&self) -> u64 {
        self.core.total_bytes.load(Ordering::Relaxed)
    }
}

impl Default for Network {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Network {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let st = self.core.state_lock();
        f.debug_struct("Network")
            .field("reliable", &st.reliable)
            .field("long_delays", &st.long_delays)
            .field("long_reordering", &st.long_reordering)
            .field("ends", &st.ends.len())
            .field("servers", &st.servers.len())
            .finish()
    }
}

impl Core {
    fn state_lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().expect("network state poisoned")
    }

    fn sample(&self, range: &Range<Duration>) -> Duration {
        let mut rng = self.rng.lock().expect("network rng poisoned");
        sample_duration(&mut *rng, range)
    }

    fn chance(&self, probability: f64) -> bool {
        let mut rng = self.rng.lock().expect("network rng poisoned");
        rng.random::<f64>() < probability
    }

    /// Deferred-reply latency: a fixed floor plus compound-uniform skew.
    fn reorder_delay(&self) -> Duration {
        let mut rng = self.rng.lock().expect("network rng poisoned");
        let max_ms = self.profile.reorder_skew_max.as_millis() as u64;
        let extra = if max_ms == 0 {
            0
        } else {
            let inner = rng.random_range(0..max_ms);
            rng.random_range(0..=inner)
        };
        self.profile.reorder_base_delay + Duration::from_millis(extra)
    }

    fn endpoint_snapshot(&self, endname: &EndpointName) -> EndpointSnapshot {
        let st = self.state_lock();
        let enabled = st.enabled.get(endname).copied().unwrap_or(false);
        let servername = st.connections.get(endname).cloned().flatten();
        let server = servername
            .as_ref()
            .and_then(|name| st.servers.get(name).cloned().flatten());
        EndpointSnapshot {
            enabled,
            servername,
            server,
            reliable: st.reliable,
            long_reordering: st.long_reordering,
        }
    }

    /// A call's server is dead when its endpoint got disabled or the name
    /// no longer resolves to the same server object it was dispatched to.
    fn server_dead(
        &self,
        endname: &EndpointName,
        servername: &ServerName,
        server: &Arc<Server>,
    ) -> bool {
        let st = self.state_lock();
        if !st.enabled.get(endname).copied().unwrap_or(false) {
            return true;
        }
        match st.servers.get(servername) {
            Some(Some(current)) => !Arc::ptr_eq(current, server),
            _ => true,
        }
    }

    /// Consume inbound requests until torn down, spawning one delivery
    /// task per request.
    async fn pump(core: Arc<Core>, mut inbound: mpsc::Receiver<RequestMessage>) {
        loop {
            tokio::select! {
                _ = core.done.cancelled() => {
                    tracing::debug!("network pump stopped");
                    return;
                }
                request = inbound.recv() => {
                    // All endpoints dropped means nothing can send again.
                    let Some(request) = request else { return };
                    core.total_count.fetch_add(1, Ordering::Relaxed);
                    core.total_bytes
                        .fetch_add(request.args.len() as u64, Ordering::Relaxed);
                    tokio::spawn(Core::deliver(core.clone(), request));
                }
            }
        }
    }

    /// The per-call delivery state machine.
    async fn deliver(core: Arc<Core>, request: RequestMessage) {
        let RequestMessage {
            endname,
            svc_meth,
            args_type,
            args,
            reply_tx,
        } = request;

        // Snapshot the routing state once; the rest of delivery judges
        // liveness against this capture.
        let snap = core.endpoint_snapshot(&endname);
        let (servername, server) = match (snap.enabled, snap.servername, snap.server) {
            (true, Some(servername), Some(server)) => (servername, server),
            _ => {
                core.black_hole(&endname, &svc_meth, reply_tx).await;
                return;
            }
        };

        tracing::trace!(
            end = %endname,
            method = %svc_meth,
            args = args_type,
            len = args.len(),
            "delivering request"
        );

        if !snap.reliable {
            let delay = core.sample(&core.profile.unreliable_delay);
            sleep(delay).await;
            if core.chance(core.profile.request_drop_probability) {
                tracing::trace!(end = %endname, method = %svc_meth, "request dropped");
                let _ = reply_tx.send(ReplyMessage::failure());
                return;
            }
        }

        // Run the method on its own task so delivery can keep watching for
        // the server's death. The oneshot's slot lets the dispatch task
        // finish even if nobody is left listening.
        let (dispatch_tx, mut dispatch_rx) = oneshot::channel();
        {
            let server = server.clone();
            let svc_meth = svc_meth.clone();
            tokio::spawn(async move {
                let reply = server.dispatch(&svc_meth, args).await;
                let _ = dispatch_tx.send(reply);
            });
        }

        // Race the handler against periodic liveness checks.
        let mut reply = None;
        loop {
            tokio::select! {
                result = &mut dispatch_rx => {
                    if let Ok(r) = result {
                        reply = Some(r);
                    }
                    // A receive error means the dispatch task died without
                    // posting (its panic is already loud); treat as no reply.
                    break;
                }
                _ = sleep(core.profile.liveness_poll_interval) => {
                    if core.server_dead(&endname, &servername, &server) {
                        tracing::debug!(
                            end = %endname,
                            server = %servername,
                            method = %svc_meth,
                            "server died mid-call"
                        );
                        break;
                    }
                }
            }
        }

        // Final liveness gate: a reply computed by a server that has since
        // been replaced or unplugged must not surface.
        let dead = core.server_dead(&endname, &servername, &server);
        let reply = match reply {
            Some(reply) if !dead => reply,
            _ => {
                let _ = reply_tx.send(ReplyMessage::failure());
                return;
            }
        };

        if !snap.reliable && core.chance(core.profile.reply_drop_probability) {
            tracing::trace!(end = %endname, method = %svc_meth, "reply dropped");
            let _ = reply_tx.send(ReplyMessage::failure());
        } else if snap.long_reordering && core.chance(core.profile.reorder_probability) {
            let delay = core.reorder_delay();
            tracing::trace!(end = %endname, method = %svc_meth, ?delay, "reply deferred");
            let core = core.clone();
            tokio::spawn(async move {
                sleep(delay).await;
                core.total_bytes
                    .fetch_add(reply.data.len() as u64, Ordering::Relaxed);
                let _ = reply_tx.send(reply);
            });
        } else {
            core.total_bytes
                .fetch_add(reply.data.len() as u64, Ordering::Relaxed);
            let _ = reply_tx.send(reply);
        }
    }

    /// No reachable server: wait a while, then fail. The randomized wait
    /// keeps callers from telling a partitioned server apart from a slow
    /// one.
    async fn black_hole(
        &self,
        endname: &EndpointName,
        svc_meth: &str,
        reply_tx: oneshot::Sender<ReplyMessage>,
    ) {
        let long = self.state_lock().long_delays;
        let range = if long {
            &self.profile.blackhole_delay_long
        } else {
            &self.profile.blackhole_delay
        };
        let delay = self.sample(range);
        tracing::trace!(end = %endname, method = svc_meth, ?delay, "black-holing unreachable call");
        sleep(delay).await;
        let _ = reply_tx.send(ReplyMessage::failure());
    }
}
