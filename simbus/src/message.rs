//! Internal message types carried by the fabric.

use tokio::sync::oneshot;

use crate::names::EndpointName;

/// One RPC in flight: produced by `ClientEnd::call`, consumed by the
/// network pump, answered exactly once over `reply_tx`.
pub(crate) struct RequestMessage {
    /// Originating endpoint.
    pub endname: EndpointName,
    /// Dotted `Service.Method` name.
    pub svc_meth: String,
    /// Base name of the argument type, for diagnostics.
    pub args_type: &'static str,
    /// Encoded argument frame.
    pub args: Vec<u8>,
    /// Private single-shot reply channel owned by the calling task. The
    /// one-slot buffer is what lets a dispatch task outlive interest in its
    /// reply without anyone draining it.
    pub reply_tx: oneshot::Sender<ReplyMessage>,
}

/// Outcome of one RPC.
#[derive(Debug, Clone)]
pub(crate) struct ReplyMessage {
    /// Whether a reply was produced and survived delivery.
    pub ok: bool,
    /// Encoded reply frame; empty on failure.
    pub data: Vec<u8>,
}

impl ReplyMessage {
    pub(crate) fn success(data: Vec<u8>) -> Self {
        ReplyMessage { ok: true, data }
    }

    pub(crate) fn failure() -> Self {
        ReplyMessage {
            ok: false,
            data: Vec::new(),
        }
    }
}
