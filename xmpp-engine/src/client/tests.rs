// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use futures::StreamExt;
use tokio::io::DuplexStream;
use tokio::sync::oneshot;

use super::*;
use crate::client::auth::{Authenticator, AuthenticatorProvider};
use crate::connect::{DnsConfig, SrvRecord, SrvTarget};
use crate::error::{AuthError, UpgradeError};
use crate::event::StanzaKind;
use crate::state::FailureReason;
use crate::xmlstream::{RxmlTransport, StreamItem, XmlEvent, XmlStream, XmlTransport};

#[derive(Default)]
struct Stats {
    closes: AtomicUsize,
    upgrades: AtomicUsize,
    reject_upgrades: AtomicBool,
}

/// Client side of an in-memory connection. StartTLS only flips a flag.
struct MockTransport {
    inner: RxmlTransport<DuplexStream>,
    encrypted: bool,
    stats: Arc<Stats>,
}

impl XmlTransport for MockTransport {
    async fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        self.inner.write_all(data).await
    }

    async fn next_event(&mut self) -> io::Result<Option<XmlEvent>> {
        self.inner.next_event().await
    }

    async fn upgrade_to_encrypted(&mut self, _domain: &str) -> Result<(), UpgradeError> {
        if self.encrypted {
            return Err(UpgradeError::AlreadyEncrypted);
        }
        if self.stats.reject_upgrades.load(Ordering::SeqCst) {
            return Err(UpgradeError::Io(io::Error::new(
                io::ErrorKind::InvalidData,
                "certificate rejected",
            )));
        }
        self.encrypted = true;
        self.stats.upgrades.fetch_add(1, Ordering::SeqCst);
        self.inner.reset();
        Ok(())
    }

    fn is_encrypted(&self) -> bool {
        self.encrypted
    }

    fn reset(&mut self) {
        self.inner.reset()
    }

    async fn close_gracefully(&mut self) -> io::Result<()> {
        self.stats.closes.fetch_add(1, Ordering::SeqCst);
        self.inner.close_gracefully().await
    }
}

/// Accepts connections to `reachable` hosts and hands the server side of
/// each to the test.
struct MockConnector {
    reachable: Vec<String>,
    attempts: Arc<Mutex<Vec<String>>>,
    servers: tokio::sync::mpsc::UnboundedSender<FakeServer>,
    stats: Arc<Stats>,
}

impl ServerConnector for MockConnector {
    type Transport = MockTransport;

    async fn connect(&self, target: &SrvTarget) -> Result<MockTransport, Error> {
        self.attempts.lock().unwrap().push(target.host.clone());
        if !self.reachable.contains(&target.host) {
            return Err(io::Error::new(io::ErrorKind::ConnectionRefused, "refused").into());
        }
        let (client, server) = tokio::io::duplex(65536);
        let _ = self.servers.send(FakeServer {
            stream: XmlStream::new(RxmlTransport::new(server)),
        });
        Ok(MockTransport {
            inner: RxmlTransport::new(client),
            encrypted: false,
            stats: self.stats.clone(),
        })
    }
}

struct Records(Vec<SrvRecord>);

impl SrvRecordSource for Records {
    async fn lookup(&self, _name: &str) -> Result<Vec<SrvRecord>, Error> {
        Ok(self.0.clone())
    }
}

/// Server end of one connection.
struct FakeServer {
    stream: XmlStream<RxmlTransport<DuplexStream>>,
}

impl FakeServer {
    async fn expect_header(&mut self) {
        match self.stream.recv().await.unwrap() {
            StreamItem::Header(header) => assert_eq!(header.to.as_deref(), Some("example.org")),
            other => panic!("expected stream header, got {:?}", other),
        }
    }

    async fn recv(&mut self) -> Element {
        match self.stream.recv().await.unwrap() {
            StreamItem::Element(elem) => elem,
            other => panic!("expected element, got {:?}", other),
        }
    }

    async fn send(&mut self, xml: &str) {
        let elem: Element = xml.parse().unwrap();
        self.stream.send_element(&elem).await.unwrap();
    }

    /// Answer the client's stream header.
    async fn open(&mut self, features: &str) {
        self.expect_header().await;
        self.stream.send_header("client").await.unwrap();
        self.send(features).await;
    }

    /// Answer the client's stream restart.
    async fn reopen(&mut self, features: &str) {
        self.stream.reset();
        self.open(features).await;
    }

    async fn bind_request(&mut self) -> Element {
        let iq = self.recv().await;
        assert!(iq.is("iq", ns::JABBER_CLIENT));
        assert_eq!(iq.attr("type"), Some("set"));
        assert_eq!(iq.attr("id"), Some("resource-bind"));
        assert!(iq.has_child("bind", ns::BIND));
        iq
    }

    async fn bind(&mut self, jid: &str) {
        self.bind_request().await;
        self.send(&format!(
            "<iq xmlns='jabber:client' type='result' id='resource-bind'>\
                <bind xmlns='urn:ietf:params:xml:ns:xmpp-bind'><jid>{}</jid></bind>\
            </iq>",
            jid
        ))
        .await;
    }
}

/// Answers the challenge `ping` with `pong`, then expects success.
struct PingPong;

impl Authenticator for PingPong {
    fn mechanism_name(&self) -> &str {
        "X-PING-PONG"
    }

    fn initial_response(&mut self) -> Option<Vec<u8>> {
        Some(b"hello".to_vec())
    }

    fn step(&mut self, challenge: &[u8]) -> Result<(Option<Vec<u8>>, bool), AuthError> {
        if challenge != b"ping" {
            return Err(AuthError::Mechanism("expected ping".to_owned()));
        }
        Ok((Some(b"pong".to_vec()), true))
    }
}

impl AuthenticatorProvider for PingPong {
    fn preferences(&self) -> Vec<String> {
        vec!["X-PING-PONG".to_owned()]
    }

    fn create(&self, _mechanism: &str) -> Result<Box<dyn Authenticator>, AuthError> {
        Ok(Box::new(PingPong))
    }
}

const PING_PONG_OFFERED: &str = "<stream:features xmlns:stream='http://etherx.jabber.org/streams'>\
    <mechanisms xmlns='urn:ietf:params:xml:ns:xmpp-sasl'>\
        <mechanism>PLAIN</mechanism>\
        <mechanism>X-PING-PONG</mechanism>\
    </mechanisms>\
</stream:features>";

const STARTTLS_ONLY: &str = "<stream:features xmlns:stream='http://etherx.jabber.org/streams'>\
    <starttls xmlns='urn:ietf:params:xml:ns:xmpp-tls'/>\
</stream:features>";

const BIND_ONLY: &str = "<stream:features xmlns:stream='http://etherx.jabber.org/streams'>\
    <bind xmlns='urn:ietf:params:xml:ns:xmpp-bind'/>\
</stream:features>";

struct Harness {
    client: Client,
    servers: tokio::sync::mpsc::UnboundedReceiver<FakeServer>,
    attempts: Arc<Mutex<Vec<String>>>,
    stats: Arc<Stats>,
}

impl Harness {
    fn new(records: Vec<SrvRecord>, reachable: &[&str]) -> Self {
        Self::with_config(records, reachable, |config| config)
    }

    fn with_config(
        records: Vec<SrvRecord>,
        reachable: &[&str],
        customize: impl FnOnce(ClientConfig) -> ClientConfig,
    ) -> Self {
        let _ = env_logger::builder().is_test(true).try_init();
        let (servers_tx, servers) = tokio::sync::mpsc::unbounded_channel();
        let attempts = Arc::new(Mutex::new(Vec::new()));
        let stats = Arc::new(Stats::default());
        let connector = MockConnector {
            reachable: reachable.iter().map(|host| host.to_string()).collect(),
            attempts: attempts.clone(),
            servers: servers_tx,
            stats: stats.clone(),
        };
        let jid: Jid = "user@example.org".parse().unwrap();
        let config = ClientConfig::new(jid, "pencil")
            .with_dns(DnsConfig::srv_default_client("example.org"))
            .with_srv_seed(7);
        let client = Client::connect_with(customize(config), connector, Records(records)).unwrap();
        Harness {
            client,
            servers,
            attempts,
            stats,
        }
    }

    fn single(reachable: &str) -> Self {
        Self::new(vec![SrvRecord::new(0, 0, 5222, reachable)], &[reachable])
    }

    fn single_with(
        reachable: &str,
        customize: impl FnOnce(ClientConfig) -> ClientConfig,
    ) -> Self {
        Self::with_config(
            vec![SrvRecord::new(0, 0, 5222, reachable)],
            &[reachable],
            customize,
        )
    }

    async fn accept(&mut self) -> FakeServer {
        self.servers.recv().await.unwrap()
    }

    /// Collect the state changes up to and including `Ready` or a
    /// terminal state.
    async fn states_until_settled(&mut self) -> Vec<StreamState> {
        let mut states = Vec::new();
        while let Some(event) = self.client.next().await {
            if let Event::StateChanged(state) = event {
                let settled = state.is_ready() || state.is_terminal();
                states.push(state);
                if settled {
                    break;
                }
            }
        }
        states
    }

    /// Drain the remaining events until the worker has exited.
    async fn finish(&mut self) -> Vec<Event> {
        let mut events = Vec::new();
        while let Some(event) = self.client.next().await {
            events.push(event);
        }
        events
    }

    fn closes(&self) -> usize {
        self.stats.closes.load(Ordering::SeqCst)
    }
}

fn counting(
    hits: &Arc<AtomicUsize>,
    results: &Arc<Mutex<Vec<Result<Element, IqFailure>>>>,
) -> Box<dyn Continuation> {
    let hits = hits.clone();
    let results = results.clone();
    Box::new(move |result: Result<Element, IqFailure>| {
        hits.fetch_add(1, Ordering::SeqCst);
        results.lock().unwrap().push(result);
    })
}

fn last_state(events: &[Event]) -> Option<&StreamState> {
    events.iter().rev().find_map(Event::as_state)
}

#[tokio::test]
async fn unreachable_targets_fail_once() {
    let mut h = Harness::new(
        vec![
            SrvRecord::new(1, 0, 5222, "b.example.org"),
            SrvRecord::new(0, 0, 5222, "a.example.org"),
        ],
        &[],
    );

    // The worker has not run yet on this single-threaded runtime.
    let hits = Arc::new(AtomicUsize::new(0));
    let results = Arc::new(Mutex::new(Vec::new()));
    for id in ["x-1", "x-2", "x-3"] {
        h.client.registry.register(id, counting(&hits, &results)).unwrap();
    }

    let events = h.finish().await;
    let states: Vec<&StreamState> = events.iter().filter_map(Event::as_state).collect();
    let failed = StreamState::Failed(FailureReason::NoReachableHost);
    assert_eq!(
        states,
        vec![&StreamState::Resolving, &StreamState::Connecting, &failed]
    );
    assert_eq!(
        *h.attempts.lock().unwrap(),
        vec!["a.example.org", "b.example.org"]
    );

    assert_eq!(hits.load(Ordering::SeqCst), 3);
    let failure = IqFailure::Failed(FailureReason::NoReachableHost);
    assert!(results.lock().unwrap().iter().all(|r| *r == Err(failure.clone())));
    assert!(h.client.registry.is_closed());
    assert_eq!(h.closes(), 0);
    assert_eq!(h.client.state(), failed);
    assert!(matches!(
        h.client.wait_until_ready().await,
        Err(Error::Failed(FailureReason::NoReachableHost))
    ));
}

#[tokio::test]
async fn bind_only_reaches_ready_on_weighted_target() {
    let mut h = Harness::new(
        vec![
            SrvRecord::new(0, 10, 5222, "a.example.org"),
            SrvRecord::new(0, 0, 5222, "b.example.org"),
        ],
        &["a.example.org"],
    );

    let mut server = h.accept().await;
    server.open(BIND_ONLY).await;
    server.bind("user@example.org/res").await;

    let states = h.states_until_settled().await;
    assert_eq!(
        states,
        vec![
            StreamState::Resolving,
            StreamState::Connecting,
            StreamState::StreamOpening,
            StreamState::Binding,
            StreamState::Ready,
        ]
    );
    assert!(!states.contains(&StreamState::NegotiatingTls));
    assert!(!states.contains(&StreamState::NegotiatingAuth));
    assert_eq!(*h.attempts.lock().unwrap(), vec!["a.example.org"]);

    let jid = h.client.wait_until_ready().await.unwrap();
    assert_eq!(jid.to_string(), "user@example.org/res");
    match h.client.next().await {
        Some(Event::Online { bound_jid }) => assert_eq!(bound_jid, jid),
        other => panic!("expected online event, got {:?}", other),
    }
    assert_eq!(h.client.bound_jid(), Some(jid));
}

#[tokio::test]
async fn iq_response_is_routed_once() {
    let mut h = Harness::single("xmpp.example.org");
    let mut server = h.accept().await;
    server.open(BIND_ONLY).await;
    server.bind("user@example.org/res").await;
    h.client.wait_until_ready().await.unwrap();

    let (tx, rx) = oneshot::channel();
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = hits.clone();
    let ping = Element::builder("ping", "urn:xmpp:ping").build();
    let id = h
        .client
        .send_iq(None, IqRequest::Get(ping), move |result| {
            counter.fetch_add(1, Ordering::SeqCst);
            let _ = tx.send(result);
        })
        .await
        .unwrap();
    assert_eq!(id, "id-1");

    let request = server.recv().await;
    assert_eq!(request.attr("id"), Some("id-1"));
    assert_eq!(request.attr("type"), Some("get"));
    assert!(request.has_child("ping", "urn:xmpp:ping"));

    let response = "<iq xmlns='jabber:client' type='result' id='id-1'/>";
    server.send(response).await;
    server.send(response).await;

    let result = rx.await.unwrap().unwrap();
    assert_eq!(result.attr("id"), Some("id-1"));

    let stanza = loop {
        match h.client.next().await {
            Some(Event::Stanza(stanza)) => break stanza,
            Some(_) => continue,
            None => panic!("connection ended"),
        }
    };
    assert_eq!(stanza.id(), Some("id-1"));
    assert!(stanza.is_iq_response());
    assert_eq!(hits.load(Ordering::SeqCst), 1);
    assert!(h.client.registry.is_empty());

    h.client.disconnect().await.unwrap();
    assert_eq!(server.stream.recv().await.unwrap(), StreamItem::Footer);
    let events = h.finish().await;
    assert_eq!(last_state(&events), Some(&StreamState::Closed));
    assert_eq!(h.closes(), 1);
}

#[tokio::test]
async fn stream_error_fails_and_closes_once() {
    let mut h = Harness::single("xmpp.example.org");
    let mut server = h.accept().await;
    server.open(BIND_ONLY).await;
    server.bind("user@example.org/res").await;
    h.client.wait_until_ready().await.unwrap();

    let token = h
        .client
        .iq(None, IqRequest::Get(Element::builder("ping", "urn:xmpp:ping").build()))
        .await
        .unwrap();
    let _request = server.recv().await;

    server
        .send(
            "<stream:error xmlns:stream='http://etherx.jabber.org/streams'>\
                <conflict xmlns='urn:ietf:params:xml:ns:xmpp-streams'/>\
                <text xmlns='urn:ietf:params:xml:ns:xmpp-streams'>Replaced by new connection</text>\
            </stream:error>",
        )
        .await;

    let reason = FailureReason::StreamError {
        condition: "conflict".to_owned(),
        text: Some("Replaced by new connection".to_owned()),
    };
    assert_eq!(token.await, Err(IqFailure::Failed(reason.clone())));

    let events = h.finish().await;
    assert_eq!(last_state(&events), Some(&StreamState::Failed(reason)));
    assert_eq!(h.closes(), 1);
    assert_eq!(server.stream.recv().await.unwrap(), StreamItem::Footer);
}

#[tokio::test]
async fn starttls_then_plain_then_bind() {
    let mut h = Harness::single("xmpp.example.org");
    let mut server = h.accept().await;

    server
        .open(
            "<stream:features xmlns:stream='http://etherx.jabber.org/streams'>\
                <starttls xmlns='urn:ietf:params:xml:ns:xmpp-tls'><required/></starttls>\
            </stream:features>",
        )
        .await;
    let starttls = server.recv().await;
    assert!(starttls.is("starttls", ns::TLS));
    server
        .send("<proceed xmlns='urn:ietf:params:xml:ns:xmpp-tls'/>")
        .await;

    server
        .reopen(
            "<stream:features xmlns:stream='http://etherx.jabber.org/streams'>\
                <mechanisms xmlns='urn:ietf:params:xml:ns:xmpp-sasl'>\
                    <mechanism>PLAIN</mechanism>\
                </mechanisms>\
            </stream:features>",
        )
        .await;
    let auth = server.recv().await;
    assert!(auth.is("auth", ns::SASL));
    assert_eq!(auth.attr("mechanism"), Some("PLAIN"));
    assert_eq!(auth.text(), "AHVzZXIAcGVuY2ls");
    server
        .send("<success xmlns='urn:ietf:params:xml:ns:xmpp-sasl'/>")
        .await;

    server.reopen(BIND_ONLY).await;
    server.bind("user@example.org/laptop").await;

    let states = h.states_until_settled().await;
    assert_eq!(
        states,
        vec![
            StreamState::Resolving,
            StreamState::Connecting,
            StreamState::StreamOpening,
            StreamState::NegotiatingTls,
            StreamState::StreamRestarting,
            StreamState::StreamOpening,
            StreamState::NegotiatingAuth,
            StreamState::StreamRestarting,
            StreamState::StreamOpening,
            StreamState::Binding,
            StreamState::Ready,
        ]
    );
    assert_eq!(h.stats.upgrades.load(Ordering::SeqCst), 1);
    assert_eq!(
        h.client.bound_jid().map(|jid| jid.to_string()).as_deref(),
        Some("user@example.org/laptop")
    );
}

#[tokio::test]
async fn sasl_failure_is_fatal() {
    let mut h = Harness::single("xmpp.example.org");
    let mut server = h.accept().await;
    server
        .open(
            "<stream:features xmlns:stream='http://etherx.jabber.org/streams'>\
                <mechanisms xmlns='urn:ietf:params:xml:ns:xmpp-sasl'>\
                    <mechanism>PLAIN</mechanism>\
                </mechanisms>\
            </stream:features>",
        )
        .await;
    let _auth = server.recv().await;
    server
        .send(
            "<failure xmlns='urn:ietf:params:xml:ns:xmpp-sasl'>\
                <not-authorized/>\
            </failure>",
        )
        .await;

    let states = h.states_until_settled().await;
    assert!(states.contains(&StreamState::NegotiatingAuth));
    match states.last() {
        Some(StreamState::Failed(FailureReason::AuthenticationFailed(reason))) => {
            assert!(reason.contains("not-authorized"), "{}", reason)
        }
        other => panic!("unexpected final state {:?}", other),
    }
    h.finish().await;
    assert_eq!(h.closes(), 1);
}

#[tokio::test]
async fn disconnect_during_negotiation() {
    let mut h = Harness::single("xmpp.example.org");
    let mut server = h.accept().await;
    server.expect_header().await;

    h.client.disconnect().await.unwrap();
    let events = h.finish().await;
    assert_eq!(last_state(&events), Some(&StreamState::Closed));
    assert!(!events.iter().any(Event::is_online));
    assert_eq!(h.closes(), 1);
    assert_eq!(server.stream.recv().await.unwrap(), StreamItem::Footer);
}

#[tokio::test]
async fn server_closing_stream_is_a_transport_failure() {
    let mut h = Harness::single("xmpp.example.org");
    let mut server = h.accept().await;
    server.open(BIND_ONLY).await;
    server.bind("user@example.org/res").await;
    h.client.wait_until_ready().await.unwrap();

    server.stream.close().await.unwrap();
    let events = h.finish().await;
    assert!(matches!(
        last_state(&events),
        Some(StreamState::Failed(FailureReason::TransportError(_)))
    ));
    assert_eq!(h.closes(), 1);
}

#[tokio::test]
async fn sending_before_ready_is_refused() {
    let h = Harness::single("xmpp.example.org");
    let ping = Element::builder("ping", "urn:xmpp:ping").build();
    assert!(matches!(
        h.client.send_iq(None, IqRequest::Get(ping), |_| ()).await,
        Err(Error::NotConnected)
    ));
    assert!(matches!(
        h.client
            .send_stanza(Element::builder("message", ns::JABBER_CLIENT).build())
            .await,
        Err(Error::NotConnected)
    ));
    assert!(h.client.registry.is_empty());
}

#[tokio::test]
async fn unsolicited_stanzas_reach_the_observer() {
    let mut h = Harness::single("xmpp.example.org");
    let mut server = h.accept().await;
    server.open(BIND_ONLY).await;
    server.bind("user@example.org/res").await;
    h.client.wait_until_ready().await.unwrap();

    server
        .send("<message xmlns='jabber:client' id='m1'><body>hi</body></message>")
        .await;
    server
        .send("<iq xmlns='jabber:client' type='get' id='id-1'><ping xmlns='urn:xmpp:ping'/></iq>")
        .await;

    let mut stanzas = Vec::new();
    while stanzas.len() < 2 {
        match h.client.next().await {
            Some(Event::Stanza(stanza)) => stanzas.push(stanza),
            Some(_) => (),
            None => panic!("connection ended"),
        }
    }
    assert_eq!(stanzas[0].kind(), StanzaKind::Message);
    assert_eq!(
        stanzas[1].kind(),
        StanzaKind::Iq(Some(crate::event::IqType::Get))
    );

    let id = h
        .client
        .send_stanza(Element::builder("presence", ns::JABBER_CLIENT).build())
        .await
        .unwrap();
    assert_eq!(id, "id-1");
    let presence = server.recv().await;
    assert!(presence.is("presence", ns::JABBER_CLIENT));
    assert_eq!(presence.attr("id"), Some("id-1"));
}

#[tokio::test]
async fn starttls_refusal_is_fatal() {
    let mut h = Harness::single("xmpp.example.org");
    let mut server = h.accept().await;
    server.open(STARTTLS_ONLY).await;
    let starttls = server.recv().await;
    assert!(starttls.is("starttls", ns::TLS));
    server
        .send("<failure xmlns='urn:ietf:params:xml:ns:xmpp-tls'/>")
        .await;

    let states = h.states_until_settled().await;
    assert!(states.contains(&StreamState::NegotiatingTls));
    assert!(matches!(
        states.last(),
        Some(StreamState::Failed(FailureReason::TlsNegotiationFailed(_)))
    ));
    h.finish().await;
    assert_eq!(h.stats.upgrades.load(Ordering::SeqCst), 0);
    assert_eq!(h.closes(), 1);
}

#[tokio::test]
async fn failed_upgrade_is_fatal() {
    let mut h = Harness::single("xmpp.example.org");
    h.stats.reject_upgrades.store(true, Ordering::SeqCst);
    let mut server = h.accept().await;
    server.open(STARTTLS_ONLY).await;
    let _starttls = server.recv().await;
    server
        .send("<proceed xmlns='urn:ietf:params:xml:ns:xmpp-tls'/>")
        .await;

    let states = h.states_until_settled().await;
    assert!(!states.contains(&StreamState::StreamRestarting));
    match states.last() {
        Some(StreamState::Failed(FailureReason::TlsNegotiationFailed(reason))) => {
            assert!(reason.contains("certificate rejected"), "{}", reason)
        }
        other => panic!("unexpected final state {:?}", other),
    }
    h.finish().await;
    assert_eq!(h.closes(), 1);
}

#[tokio::test]
async fn sasl_challenge_is_answered() {
    let mut h = Harness::single_with("xmpp.example.org", |config| {
        config.with_authenticator(Arc::new(PingPong))
    });
    let mut server = h.accept().await;
    server.open(PING_PONG_OFFERED).await;

    let auth = server.recv().await;
    assert!(auth.is("auth", ns::SASL));
    assert_eq!(auth.attr("mechanism"), Some("X-PING-PONG"));
    assert_eq!(auth.text(), "aGVsbG8=");
    server
        .send("<challenge xmlns='urn:ietf:params:xml:ns:xmpp-sasl'>cGluZw==</challenge>")
        .await;
    let response = server.recv().await;
    assert!(response.is("response", ns::SASL));
    assert_eq!(response.text(), "cG9uZw==");
    server
        .send("<success xmlns='urn:ietf:params:xml:ns:xmpp-sasl'/>")
        .await;

    server.reopen(BIND_ONLY).await;
    server.bind("user@example.org/res").await;
    let states = h.states_until_settled().await;
    assert!(states.contains(&StreamState::NegotiatingAuth));
    assert_eq!(states.last(), Some(&StreamState::Ready));

    h.client.disconnect().await.unwrap();
    let events = h.finish().await;
    assert_eq!(last_state(&events), Some(&StreamState::Closed));
    assert_eq!(h.closes(), 1);
}

#[tokio::test]
async fn challenge_after_final_response_is_fatal() {
    let mut h = Harness::single_with("xmpp.example.org", |config| {
        config.with_authenticator(Arc::new(PingPong))
    });
    let mut server = h.accept().await;
    server.open(PING_PONG_OFFERED).await;
    let _auth = server.recv().await;
    server
        .send("<challenge xmlns='urn:ietf:params:xml:ns:xmpp-sasl'>cGluZw==</challenge>")
        .await;
    let _response = server.recv().await;
    server
        .send("<challenge xmlns='urn:ietf:params:xml:ns:xmpp-sasl'>cGluZw==</challenge>")
        .await;

    let states = h.states_until_settled().await;
    match states.last() {
        Some(StreamState::Failed(FailureReason::AuthenticationFailed(reason))) => {
            assert!(reason.contains("unexpected challenge"), "{}", reason)
        }
        other => panic!("unexpected final state {:?}", other),
    }
    h.finish().await;
    assert_eq!(h.closes(), 1);
}

#[tokio::test]
async fn bind_requests_configured_resource() {
    let mut h = Harness::single_with("xmpp.example.org", |mut config| {
        config.jid = "user@example.org/laptop".parse().unwrap();
        config
    });
    let mut server = h.accept().await;
    server.open(BIND_ONLY).await;

    let request = server.bind_request().await;
    let resource = request
        .get_child("bind", ns::BIND)
        .and_then(|bind| bind.get_child("resource", ns::BIND))
        .map(Element::text);
    assert_eq!(resource.as_deref(), Some("laptop"));
    server
        .send(
            "<iq xmlns='jabber:client' type='result' id='resource-bind'>\
                <bind xmlns='urn:ietf:params:xml:ns:xmpp-bind'>\
                    <jid>user@example.org/laptop</jid>\
                </bind>\
            </iq>",
        )
        .await;

    let jid = h.client.wait_until_ready().await.unwrap();
    assert_eq!(jid.to_string(), "user@example.org/laptop");

    h.client.disconnect().await.unwrap();
    h.finish().await;
    assert_eq!(h.closes(), 1);
}

#[tokio::test]
async fn bind_error_is_fatal() {
    let mut h = Harness::single("xmpp.example.org");
    let mut server = h.accept().await;
    server.open(BIND_ONLY).await;
    let _request = server.bind_request().await;
    server
        .send(
            "<iq xmlns='jabber:client' type='error' id='resource-bind'>\
                <error type='cancel'>\
                    <conflict xmlns='urn:ietf:params:xml:ns:xmpp-stanzas'/>\
                </error>\
            </iq>",
        )
        .await;

    let states = h.states_until_settled().await;
    assert!(states.contains(&StreamState::Binding));
    match states.last() {
        Some(StreamState::Failed(FailureReason::ProtocolViolation(reason))) => {
            assert!(reason.contains("conflict"), "{}", reason)
        }
        other => panic!("unexpected final state {:?}", other),
    }
    assert!(h.client.bound_jid().is_none());
    h.finish().await;
    assert_eq!(h.closes(), 1);
}
