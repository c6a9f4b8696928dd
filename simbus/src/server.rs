//! Servers: named containers of services.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::message::ReplyMessage;
use crate::service::Service;

/// A container of [`Service`]s addressable by dotted `Service.Method` names.
///
/// A server object has identity: installing a *new* `Server` under an
/// existing name in the fabric invalidates calls still in flight against
/// the old object, which is how tests model a crashed-and-rebooted process.
pub struct Server {
    inner: Mutex<ServerInner>,
}

struct ServerInner {
    services: HashMap<String, Arc<Service>>,
    /// Requests that reached dispatch, including ones whose reply was later
    /// dropped by the fabric.
    count: u64,
}

impl Server {
    /// Create an empty server.
    pub fn new() -> Self {
        Server {
            inner: Mutex::new(ServerInner {
                services: HashMap::new(),
                count: 0,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ServerInner> {
        self.inner.lock().expect("server state poisoned")
    }

    /// Install a service under its name. Last write wins.
    pub fn add_service(&self, service: Service) {
        let mut inner = self.lock();
        inner.services.insert(service.name().to_string(), Arc::new(service));
    }

    /// Number of requests this server has received.
    pub fn request_count(&self) -> u64 {
        self.lock().count
    }

    /// Split the dotted name at its *last* dot and delegate to the service.
    ///
    /// The service lookup and counter bump happen under the server lock; the
    /// handler itself runs after the lock is released, so a slow handler
    /// never blocks other dispatches.
    ///
    /// An unknown service (including a name with no dot at all, which reads
    /// as an empty service name) is a test-setup bug and panics with the
    /// available choices.
    pub(crate) async fn dispatch(&self, svc_meth: &str, args: Vec<u8>) -> ReplyMessage {
        let (service_name, method_name) = svc_meth.rsplit_once('.').unwrap_or(("", svc_meth));

        let service = {
            let mut inner = self.lock();
            inner.count += 1;
            inner.services.get(service_name).cloned()
        };

        match service {
            Some(service) => service.dispatch(method_name, args).await,
            None => {
                let choices = {
                    let inner = self.lock();
                    let mut names: Vec<String> = inner.services.keys().cloned().collect();
                    names.sort_unstable();
                    names
                };
                panic!(
                    "simbus: unknown service `{service_name}` in call `{svc_meth}`; \
                     expecting one of {choices:?}"
                );
            }
        }
    }
}

impl Default for Server {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.lock();
        let mut names: Vec<&String> = inner.services.keys().collect();
        names.sort_unstable();
        f.debug_struct("Server")
            .field("services", &names)
            .field("count", &inner.count)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use simbus_codec::GuardedCodec;

    struct Echo;

    fn server_with_echo() -> Server {
        let server = Server::new();
        server.add_service(
            Service::builder(Arc::new(Echo))
                .method("Upper", |_recv, args: String| async move { args.to_uppercase() })
                .build(),
        );
        server
    }

    #[tokio::test]
    async fn dispatch_splits_at_last_dot() {
        let server = Server::new();
        server.add_service(
            Service::builder(Arc::new(Echo))
                .name("kv.store")
                .method("Get", |_recv, key: String| async move { format!("<{key}>") })
                .build(),
        );

        let codec = GuardedCodec::json();
        let args = codec.encode("a").expect("encode args");
        let reply = server.dispatch("kv.store.Get", args).await;
        assert!(reply.ok);
        let out: String = codec.decode(&reply.data).expect("decode reply");
        assert_eq!(out, "<a>");
    }

    #[tokio::test]
    async fn dispatch_counts_requests() {
        let server = server_with_echo();
        let codec = GuardedCodec::json();
        let args = codec.encode("x").expect("encode args");

        assert_eq!(server.request_count(), 0);
        server.dispatch("Echo.Upper", args.clone()).await;
        server.dispatch("Echo.Upper", args).await;
        assert_eq!(server.request_count(), 2);
    }

    #[tokio::test]
    #[should_panic(expected = "unknown service")]
    async fn unknown_service_is_fatal() {
        let server = server_with_echo();
        server.dispatch("Nope.Upper", Vec::new()).await;
    }

    #[tokio::test]
    #[should_panic(expected = "unknown service")]
    async fn undotted_name_is_fatal() {
        let server = server_with_echo();
        server.dispatch("Upper", Vec::new()).await;
    }

    #[tokio::test]
    async fn later_service_replaces_earlier_one() {
        let server = Server::new();
        server.add_service(
            Service::builder(Arc::new(Echo))
                .method("Upper", |_recv, args: String| async move { args.to_uppercase() })
                .build(),
        );
        server.add_service(
            Service::builder(Arc::new(Echo))
                .method("Upper", |_recv, args: String| async move { format!("v2:{args}") })
                .build(),
        );

        let codec = GuardedCodec::json();
        let args = codec.encode("q").expect("encode args");
        let reply = server.dispatch("Echo.Upper", args).await;
        let out: String = codec.decode(&reply.data).expect("decode reply");
        assert_eq!(out, "v2:q");
    }
}
