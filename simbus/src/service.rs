//! Services: named method tables over a receiver object.
//!
//! A service is built once at test setup and installed into a [`Server`].
//! Each registered method is stored as a frame-to-frame closure (decode the
//! argument frame, run the handler against the shared receiver, encode the
//! reply), so dispatch needs no runtime type information beyond the method
//! name.
//!
//! [`Server`]: crate::Server

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde::Serialize;
use serde::de::DeserializeOwned;
use simbus_codec::{GuardedCodec, short_type_name};

use crate::message::ReplyMessage;

type Handler = Box<dyn Fn(Vec<u8>) -> BoxFuture<'static, ReplyMessage> + Send + Sync>;

/// A named collection of callable methods sharing one receiver.
///
/// The service name defaults to the receiver's base type name, so a
/// `Raft` receiver yields methods callable as `"Raft.RequestVote"`.
pub struct Service {
    name: String,
    methods: HashMap<String, Handler>,
}

impl Service {
    /// Start building a service around a shared receiver.
    pub fn builder<T: Send + Sync + 'static>(receiver: Arc<T>) -> ServiceBuilder<T> {
        ServiceBuilder {
            name: short_type_name(std::any::type_name::<T>()),
            receiver,
            methods: HashMap::new(),
        }
    }

    /// The service's registered name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Names of all dispatchable methods, sorted.
    pub fn method_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.methods.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Run one method against an encoded argument frame.
    ///
    /// An unknown method name is a test-setup bug, not a network condition,
    /// and panics with the available choices.
    pub(crate) async fn dispatch(&self, methname: &str, args: Vec<u8>) -> ReplyMessage {
        match self.methods.get(methname) {
            Some(handler) => handler(args).await,
            None => panic!(
                "simbus: unknown method `{methname}` on service `{}`; expecting one of {:?}",
                self.name,
                self.method_names()
            ),
        }
    }
}

impl std::fmt::Debug for Service {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Service")
            .field("name", &self.name)
            .field("methods", &self.method_names())
            .finish()
    }
}

/// Builder for [`Service`].
///
/// Method registration is the static rendering of the handler eligibility
/// rule: a handler takes the shared receiver and a decodable argument value
/// and resolves to an encodable reply value. Anything else does not
/// typecheck, so the dispatch table can only ever hold callable shapes.
pub struct ServiceBuilder<T> {
    name: String,
    receiver: Arc<T>,
    methods: HashMap<String, Handler>,
}

impl<T: Send + Sync + 'static> ServiceBuilder<T> {
    /// Override the derived service name. Names may contain dots; the
    /// method separator is always the last dot of the full call name.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Register a method under `name`. Last write wins on duplicates.
    pub fn method<A, R, F, Fut>(mut self, name: &str, handler: F) -> Self
    where
        A: Serialize + DeserializeOwned + Send + 'static,
        R: Serialize + Send + 'static,
        F: Fn(Arc<T>, A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = R> + Send + 'static,
    {
        let receiver = self.receiver.clone();
        let method_name = name.to_string();
        let codec = GuardedCodec::json();
        let boxed: Handler = Box::new(move |raw: Vec<u8>| -> BoxFuture<'static, ReplyMessage> {
            let args: A = match codec.decode(&raw) {
                Ok(args) => args,
                Err(e) => panic!(
                    "simbus: method `{method_name}`: cannot decode args as {}: {e}",
                    short_type_name(std::any::type_name::<A>())
                ),
            };
            let method_name = method_name.clone();
            let fut = handler(receiver.clone(), args);
            Box::pin(async move {
                let reply = fut.await;
                match codec.encode(&reply) {
                    Ok(data) => ReplyMessage::success(data),
                    Err(e) => panic!("simbus: method `{method_name}`: cannot encode reply: {e}"),
                }
            })
        });
        self.methods.insert(name.to_string(), boxed);
        self
    }

    /// Finish the service.
    pub fn build(self) -> Service {
        Service {
            name: self.name,
            methods: self.methods,
        }
    }
}
