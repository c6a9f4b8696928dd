//! Client endpoints: the sending side of the fabric.

use serde::Serialize;
use serde::de::DeserializeOwned;
use simbus_codec::GuardedCodec;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::message::{ReplyMessage, RequestMessage};
use crate::names::EndpointName;

/// A named handle that originates RPCs into the fabric.
///
/// Endpoints are created by [`Network::make_end`](crate::Network::make_end)
/// and stay valid until the network is torn down. Cloning yields another
/// handle to the same endpoint.
#[derive(Clone)]
pub struct ClientEnd {
    name: EndpointName,
    requests: mpsc::Sender<RequestMessage>,
    done: CancellationToken,
    codec: GuardedCodec,
}

impl ClientEnd {
    pub(crate) fn new(
        name: EndpointName,
        requests: mpsc::Sender<RequestMessage>,
        done: CancellationToken,
    ) -> Self {
        ClientEnd {
            name,
            requests,
            done,
            codec: GuardedCodec::json(),
        }
    }

    /// This endpoint's name.
    pub fn name(&self) -> &EndpointName {
        &self.name
    }

    /// Send an RPC and wait for the reply.
    ///
    /// Returns `true` and fills `reply` when a reply made it back; `false`
    /// when it did not. A `false` return deliberately does not say why:
    /// dropped request, dropped reply, disabled endpoint, deleted server
    /// and torn-down network are indistinguishable to the caller, exactly
    /// as they would be over a real wire.
    ///
    /// # Panics
    ///
    /// Panics when `args` cannot be encoded or a received reply cannot be
    /// decoded into `reply`. Both are test-setup bugs, not network
    /// conditions.
    pub async fn call<A, R>(&self, svc_meth: &str, args: &A, reply: &mut R) -> bool
    where
        A: Serialize,
        R: Serialize + DeserializeOwned,
    {
        let data = match self.codec.encode(args) {
            Ok(data) => data,
            Err(e) => panic!("simbus: call `{svc_meth}`: cannot encode args: {e}"),
        };

        let (reply_tx, reply_rx) = oneshot::channel();
        let request = RequestMessage {
            endname: self.name.clone(),
            svc_meth: svc_meth.to_string(),
            args_type: std::any::type_name::<A>(),
            args: data,
            reply_tx,
        };

        // Hand the request to the pump, unless the network is being torn
        // down first.
        tokio::select! {
            sent = self.requests.send(request) => {
                if sent.is_err() {
                    tracing::trace!(end = %self.name, method = svc_meth, "call after network shutdown");
                    return false;
                }
            }
            _ = self.done.cancelled() => {
                tracing::trace!(end = %self.name, method = svc_meth, "network torn down before send");
                return false;
            }
        }

        // The delivery task posts exactly one outcome. A dropped sender
        // means the pump died with the request still queued.
        let outcome = match reply_rx.await {
            Ok(outcome) => outcome,
            Err(_) => return false,
        };

        match outcome {
            ReplyMessage { ok: true, data } => {
                if let Err(e) = self.codec.decode_into(&data, reply) {
                    panic!("simbus: call `{svc_meth}`: cannot decode reply: {e}");
                }
                true
            }
            ReplyMessage { ok: false, .. } => false,
        }
    }
}

impl std::fmt::Debug for ClientEnd {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientEnd").field("name", &self.name).finish()
    }
}
