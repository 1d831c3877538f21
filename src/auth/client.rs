//! `Authorized<C>`: signs non-public calls on top of any transport.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use p256::ecdsa::{SigningKey, VerifyingKey};
use serde_json::Value;

use crate::auth::{
    timestamp_nonce, AuthorizationToken, MethodClassifier, MethodKind, GET_NONCE_METHOD,
};
use crate::error::{json_type_name, AuthError, SdkError, SubscriptionError};
use crate::jsonrpc::{
    subscribe_via, JsonRpcClient, NotificationCallback, SendOptions, Subscription,
    SubscriptionTable, TransportKind,
};

/// Header carrying the token on HTTP transports.
pub const AUTHORIZATION_HEADER: &str = "Authorization";

/// Authorization wrapper around a transport.
///
/// - Public methods pass through untouched.
/// - Private methods are signed with a timestamp nonce.
/// - PrivateNonce methods are signed with a nonce from `getNonce`.
///
/// HTTP transports receive the token in the `Authorization` header; streaming
/// transports receive it as an extra trailing parameter.
pub struct Authorized<C> {
    inner: Arc<C>,
    key: Option<Arc<SigningKey>>,
    classifier: MethodClassifier,
}

impl<C> Clone for Authorized<C> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            key: self.key.clone(),
            classifier: self.classifier.clone(),
        }
    }
}

impl<C> fmt::Debug for Authorized<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Authorized")
            .field("has_keypair", &self.key.is_some())
            .finish_non_exhaustive()
    }
}

impl<C: JsonRpcClient + 'static> Authorized<C> {
    /// Wrap `inner`.
    ///
    /// Fails with [`AuthError::InvalidGetNonceMethodKind`] unless `classifier`
    /// maps `getNonce` to [`MethodKind::Private`].
    pub fn new(
        inner: C,
        key: Option<SigningKey>,
        classifier: impl Fn(&str) -> MethodKind + Send + Sync + 'static,
    ) -> Result<Self, AuthError> {
        Self::with_classifier(inner, key, Arc::new(classifier))
    }

    pub fn with_classifier(
        inner: C,
        key: Option<SigningKey>,
        classifier: MethodClassifier,
    ) -> Result<Self, AuthError> {
        if classifier(GET_NONCE_METHOD) != MethodKind::Private {
            return Err(AuthError::InvalidGetNonceMethodKind);
        }

        Ok(Self {
            inner: Arc::new(inner),
            key: key.map(Arc::new),
            classifier,
        })
    }

    pub fn inner(&self) -> &C {
        &self.inner
    }

    pub fn method_kind(&self, method: &str) -> MethodKind {
        (self.classifier)(method)
    }

    pub fn has_keypair(&self) -> bool {
        self.key.is_some()
    }

    /// Public half of the signing key, if one is configured.
    pub fn verifying_key(&self) -> Option<VerifyingKey> {
        self.key.as_ref().map(|key| key.verifying_key().clone())
    }

    /// Fetch a server nonce. `getNonce` is itself a Private call.
    pub async fn get_nonce(&self) -> Result<i64, SdkError> {
        let result = self.send(GET_NONCE_METHOD, Vec::new()).await?;
        result.as_i64().ok_or_else(|| {
            AuthError::Schema(format!(
                "expected an integer nonce, got {} `{}`",
                json_type_name(&result),
                result
            ))
            .into()
        })
    }
}

#[async_trait]
impl<C: JsonRpcClient + 'static> JsonRpcClient for Authorized<C> {
    fn kind(&self) -> TransportKind {
        self.inner.kind()
    }

    async fn send_with(
        &self,
        method: &str,
        params: Vec<Value>,
        options: SendOptions,
    ) -> Result<Value, SdkError> {
        let kind = self.method_kind(method);
        if kind.is_public() {
            return self.inner.send_with(method, params, options).await;
        }

        let Some(key) = &self.key else {
            return Err(AuthError::KeypairNotProvided.into());
        };

        let nonce = match kind {
            MethodKind::PrivateNonce => self.get_nonce().await?,
            _ => timestamp_nonce(),
        };

        let token = AuthorizationToken::sign(key, nonce, method, &params)?.encode();
        tracing::debug!(method, nonce, kind = ?kind, "Signed request");

        if self.inner.is_http() {
            let options = options.header(AUTHORIZATION_HEADER, token);
            self.inner.send_with(method, params, options).await
        } else {
            let mut params = params;
            params.push(Value::String(token));
            self.inner.send_with(method, params, options).await
        }
    }

    fn subscription_table(&self) -> Option<SubscriptionTable> {
        self.inner.subscription_table()
    }

    /// Subscribe and unsubscribe calls go through this wrapper, so they are
    /// authorized like any other call; pushes land in the inner table.
    async fn subscribe(
        &self,
        subscribe_method: &str,
        unsubscribe_method: &str,
        params: Vec<Value>,
        callback: NotificationCallback,
    ) -> Result<Subscription, SdkError> {
        let table = self
            .inner
            .subscription_table()
            .ok_or(SubscriptionError::Unsupported)?;

        subscribe_via(
            Arc::new(self.clone()),
            table,
            subscribe_method,
            unsubscribe_method,
            params,
            callback,
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;

    #[derive(Debug, Clone, PartialEq)]
    struct Call {
        method: String,
        params: Vec<Value>,
        headers: Vec<(String, String)>,
    }

    /// Records every call and answers from a fixed script.
    struct MockTransport {
        kind: TransportKind,
        nonce_reply: Value,
        calls: Mutex<Vec<Call>>,
        table: SubscriptionTable,
    }

    impl MockTransport {
        fn new(kind: TransportKind) -> Self {
            Self {
                kind,
                nonce_reply: json!(1234),
                calls: Mutex::new(Vec::new()),
                table: SubscriptionTable::new(),
            }
        }

        fn calls(&self) -> Vec<Call> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl JsonRpcClient for MockTransport {
        fn kind(&self) -> TransportKind {
            self.kind
        }

        async fn send_with(
            &self,
            method: &str,
            params: Vec<Value>,
            options: SendOptions,
        ) -> Result<Value, SdkError> {
            self.calls.lock().unwrap().push(Call {
                method: method.to_string(),
                params,
                headers: options.headers,
            });
            match method {
                "getNonce" => Ok(self.nonce_reply.clone()),
                "subscribeThing" => Ok(json!(8)),
                _ => Ok(json!(true)),
            }
        }

        fn subscription_table(&self) -> Option<SubscriptionTable> {
            Some(self.table.clone())
        }
    }

    fn key() -> SigningKey {
        SigningKey::from_slice(&[3u8; 32]).unwrap()
    }

    fn classifier(method: &str) -> MethodKind {
        match method {
            "getUsersLeaderboard" => MethodKind::Public,
            "swap" => MethodKind::PrivateNonce,
            _ => MethodKind::Private,
        }
    }

    #[test]
    fn test_get_nonce_must_be_private() {
        for kind in [MethodKind::Public, MethodKind::PrivateNonce] {
            let err = Authorized::new(MockTransport::new(TransportKind::Http), None, move |_| kind)
                .unwrap_err();
            assert!(matches!(err, AuthError::InvalidGetNonceMethodKind));
        }
        assert!(Authorized::new(MockTransport::new(TransportKind::Http), None, classifier).is_ok());
    }

    #[tokio::test]
    async fn test_public_method_is_never_signed() {
        let client =
            Authorized::new(MockTransport::new(TransportKind::Http), Some(key()), classifier)
                .unwrap();
        client.send("getUsersLeaderboard", vec![json!(150)]).await.unwrap();

        let calls = client.inner().calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].params, vec![json!(150)]);
        assert!(calls[0].headers.is_empty());
    }

    #[tokio::test]
    async fn test_public_method_without_keypair() {
        let client =
            Authorized::new(MockTransport::new(TransportKind::Http), None, classifier).unwrap();
        assert_eq!(
            client.send("getUsersLeaderboard", vec![json!(150)]).await.unwrap(),
            json!(true)
        );
    }

    #[tokio::test]
    async fn test_private_method_without_keypair_does_no_io() {
        let client =
            Authorized::new(MockTransport::new(TransportKind::Http), None, classifier).unwrap();
        let err = client.send("getSettings", vec![]).await.unwrap_err();
        assert!(matches!(err, SdkError::Auth(AuthError::KeypairNotProvided)));
        assert!(client.inner().calls().is_empty());
    }

    #[tokio::test]
    async fn test_private_http_call_carries_header() {
        let client =
            Authorized::new(MockTransport::new(TransportKind::Http), Some(key()), classifier)
                .unwrap();
        let before = chrono::Utc::now().timestamp_millis();
        client.send("getSettings", vec![json!("a")]).await.unwrap();

        let calls = client.inner().calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].params, vec![json!("a")]);
        assert_eq!(calls[0].headers.len(), 1);
        assert_eq!(calls[0].headers[0].0, AUTHORIZATION_HEADER);

        let token = AuthorizationToken::decode(&calls[0].headers[0].1).unwrap();
        assert!(token.nonce >= before + crate::auth::NONCE_SKEW_MS);
        let expected = AuthorizationToken::sign(&key(), token.nonce, "getSettings", &[json!("a")])
            .unwrap();
        assert_eq!(token, expected);
    }

    #[tokio::test]
    async fn test_private_streaming_call_appends_token() {
        let client = Authorized::new(
            MockTransport::new(TransportKind::Streaming),
            Some(key()),
            classifier,
        )
        .unwrap();
        client.send("getSettings", vec![json!(1)]).await.unwrap();

        let calls = client.inner().calls();
        assert_eq!(calls[0].params.len(), 2);
        assert_eq!(calls[0].params[0], json!(1));
        assert!(calls[0].headers.is_empty());

        let token = AuthorizationToken::decode(calls[0].params[1].as_str().unwrap()).unwrap();
        let signer = token.recover("getSettings", &[json!(1)]).unwrap();
        assert_eq!(&signer, key().verifying_key());
    }

    #[tokio::test]
    async fn test_private_nonce_method_fetches_nonce_first() {
        let client =
            Authorized::new(MockTransport::new(TransportKind::Http), Some(key()), classifier)
                .unwrap();
        let params = vec![json!({"amount": "1"})];
        client.send("swap", params.clone()).await.unwrap();

        let calls = client.inner().calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].method, "getNonce");
        assert_eq!(calls[0].headers[0].0, AUTHORIZATION_HEADER);
        assert_eq!(calls[1].method, "swap");

        let token = AuthorizationToken::decode(&calls[1].headers[0].1).unwrap();
        assert_eq!(token.nonce, 1234);
        assert_eq!(
            token,
            AuthorizationToken::sign(&key(), 1234, "swap", &params).unwrap()
        );
    }

    #[tokio::test]
    async fn test_non_integer_nonce_is_schema_error() {
        for reply in [json!("1234"), json!(12.5), json!(null)] {
            let mut transport = MockTransport::new(TransportKind::Http);
            transport.nonce_reply = reply;
            let client = Authorized::new(transport, Some(key()), classifier).unwrap();

            let err = client.send("swap", vec![]).await.unwrap_err();
            assert!(matches!(err, SdkError::Auth(AuthError::Schema(_))));
            assert_eq!(client.inner().calls().len(), 1);
        }
    }

    #[tokio::test]
    async fn test_subscribe_is_authorized() {
        let client = Authorized::new(
            MockTransport::new(TransportKind::Streaming),
            Some(key()),
            classifier,
        )
        .unwrap();
        let sub = client
            .subscribe("subscribeThing", "unsubscribeThing", vec![json!("x")], Arc::new(|_| {}))
            .await
            .unwrap();
        assert_eq!(sub.id(), 8);
        assert!(client.inner().table.contains(8));

        sub.unsubscribe().await.unwrap();
        assert!(!client.inner().table.contains(8));

        let calls = client.inner().calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].params.len(), 2);
        assert_eq!(calls[1].method, "unsubscribeThing");
        assert_eq!(calls[1].params[0], json!("x"));
        assert_eq!(calls[1].params.len(), 2);
    }

    #[tokio::test]
    async fn test_subscribe_without_table_is_unsupported() {
        struct NoPush;

        #[async_trait]
        impl JsonRpcClient for NoPush {
            fn kind(&self) -> TransportKind {
                TransportKind::Http
            }

            async fn send_with(
                &self,
                _method: &str,
                _params: Vec<Value>,
                _options: SendOptions,
            ) -> Result<Value, SdkError> {
                Ok(json!(1))
            }
        }

        let client = Authorized::new(NoPush, None, |_| MethodKind::Private).unwrap();
        let err = client
            .subscribe("a", "b", vec![], Arc::new(|_| {}))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SdkError::Subscription(SubscriptionError::Unsupported)
        ));
    }
}
