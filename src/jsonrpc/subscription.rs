//! Subscription handles and the subscribe/unsubscribe protocol.
//!
//! The protocol runs against any [`JsonRpcClient`] used as the *sender* (so an
//! authorized wrapper signs both calls) and any [`SubscriptionTable`] as the
//! *receiver* (owned by the persistent transport that sees the pushes).

use std::fmt;
use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures_util::future::BoxFuture;
use futures_util::stream::Stream;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::error::{json_type_name, SdkError, SubscriptionError};
use crate::jsonrpc::correlation::{NotificationCallback, SubscriptionTable};
use crate::jsonrpc::JsonRpcClient;

/// Capacity of the channel behind an [`EventStream`].
pub const EVENT_BUFFER: usize = 256;

type Teardown = Box<dyn Fn() -> BoxFuture<'static, Result<(), SdkError>> + Send + Sync>;

/// A live server-side subscription.
///
/// Owned by the caller. [`Subscription::unsubscribe`] sends the unsubscribe
/// method and, once the server replies `true`, stops delivery. Calling it
/// again re-sends the unsubscribe call; whether the server accepts a second
/// unsubscribe is up to the server, and it is never retried automatically.
pub struct Subscription {
    id: u64,
    method: String,
    teardown: Teardown,
}

impl Subscription {
    pub fn new(
        id: u64,
        method: impl Into<String>,
        teardown: impl Fn() -> BoxFuture<'static, Result<(), SdkError>> + Send + Sync + 'static,
    ) -> Self {
        Self {
            id,
            method: method.into(),
            teardown: Box::new(teardown),
        }
    }

    /// Server-assigned subscription id.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// The subscribe method this handle was created with.
    pub fn method(&self) -> &str {
        &self.method
    }

    pub async fn unsubscribe(&self) -> Result<(), SdkError> {
        (self.teardown)().await
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("method", &self.method)
            .finish_non_exhaustive()
    }
}

/// Run the subscribe protocol.
///
/// 1. `sender.send(subscribe_method, params)`; the result must be a plain
///    integer, else [`SubscriptionError::InvalidSubscriptionId`]. Pushes that
///    arrive for unknown ids meanwhile are held in the table's backlog.
/// 2. Register `callback` under that id in `table`, replaying held pushes.
/// 3. Return a handle whose teardown sends `unsubscribe_method` with the same
///    params, requires exactly `true` (else
///    [`SubscriptionError::InvalidUnsubscribeReply`]) and only then removes
///    the table entry.
pub async fn subscribe_via(
    sender: Arc<dyn JsonRpcClient>,
    table: SubscriptionTable,
    subscribe_method: &str,
    unsubscribe_method: &str,
    params: Vec<Value>,
    callback: NotificationCallback,
) -> Result<Subscription, SdkError> {
    let pending = table.begin_subscribe();
    let result = sender.send(subscribe_method, params.clone()).await?;
    let id = parse_subscription_id(subscribe_method, &result)?;

    table.insert(id, callback);
    drop(pending);
    tracing::debug!(subscription = id, method = subscribe_method, "Subscribed");

    let unsubscribe_method = unsubscribe_method.to_string();
    let teardown = move || -> BoxFuture<'static, Result<(), SdkError>> {
        let sender = sender.clone();
        let table = table.clone();
        let method = unsubscribe_method.clone();
        let params = params.clone();
        Box::pin(async move {
            let reply = sender.send(&method, params).await?;
            if reply != Value::Bool(true) {
                return Err(SubscriptionError::InvalidUnsubscribeReply {
                    method,
                    value: reply,
                }
                .into());
            }
            table.remove(id);
            tracing::debug!(subscription = id, method = %method, "Unsubscribed");
            Ok(())
        })
    };

    Ok(Subscription::new(id, subscribe_method, teardown))
}

fn parse_subscription_id(method: &str, result: &Value) -> Result<u64, SubscriptionError> {
    result
        .as_u64()
        .ok_or_else(|| SubscriptionError::InvalidSubscriptionId {
            method: method.to_string(),
            ty: json_type_name(result),
        })
}

// ─── Typed event streams ─────────────────────────────────────────────────────

/// Stream of decoded push events for one subscription.
///
/// Each push is decoded into `T`; a payload that does not match yields
/// `Err(SdkError::Validation)` without ending the stream. The stream ends
/// when the subscription table drops the callback (unsubscribe or
/// connection loss).
pub struct EventStream<T> {
    subscription: Subscription,
    rx: mpsc::Receiver<Value>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> EventStream<T> {
    pub fn subscription(&self) -> &Subscription {
        &self.subscription
    }

    pub fn id(&self) -> u64 {
        self.subscription.id()
    }

    /// Tear down the underlying subscription.
    pub async fn unsubscribe(&self) -> Result<(), SdkError> {
        self.subscription.unsubscribe().await
    }
}

impl<T: DeserializeOwned> Stream for EventStream<T> {
    type Item = Result<T, SdkError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        match this.rx.poll_recv(cx) {
            Poll::Ready(Some(value)) => Poll::Ready(Some(serde_json::from_value(value).map_err(
                |e| {
                    SdkError::Validation(format!(
                        "`{}` event does not match schema: {}",
                        this.subscription.method, e
                    ))
                },
            ))),
            Poll::Ready(None) => Poll::Ready(None),
            Poll::Pending => Poll::Pending,
        }
    }
}

impl<T> fmt::Debug for EventStream<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventStream")
            .field("subscription", &self.subscription)
            .finish_non_exhaustive()
    }
}

/// Subscribe through `client` and expose pushes as a typed [`EventStream`].
pub async fn subscribe_events<T, C>(
    client: &C,
    subscribe_method: &str,
    unsubscribe_method: &str,
    params: Vec<Value>,
) -> Result<EventStream<T>, SdkError>
where
    T: DeserializeOwned,
    C: JsonRpcClient + ?Sized,
{
    let (tx, rx) = mpsc::channel(EVENT_BUFFER);
    let method = subscribe_method.to_string();
    let callback: NotificationCallback = Arc::new(move |value| {
        if let Err(mpsc::error::TrySendError::Full(_)) = tx.try_send(value) {
            tracing::warn!(method = %method, "Event buffer full, dropping notification");
        }
    });

    let subscription = client
        .subscribe(subscribe_method, unsubscribe_method, params, callback)
        .await?;

    Ok(EventStream {
        subscription,
        rx,
        _marker: PhantomData,
    })
}
