//! Capture and injection over a link.
//!
//! A [`Link`] moves whole frames and nothing else. Everything on top (filter
//! application, timeouts, cancellation, dissection, matching responses to
//! requests) lives here so any link implementation gets it for free.

use std::future::Future;
use std::io::{self, ErrorKind};
use std::ops::ControlFlow;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tracing::{debug, info, trace};

use crate::codec::{DissectionResult, Dissector};
use crate::iface::{self, InterfaceInfo};
use crate::packet::Packet;
use crate::value::Value;
use crate::{PacketBuilder, PacketError};

/// Default snapshot length (maximum bytes kept per frame)
pub const DEFAULT_SNAPLEN: usize = 65535;

/// Default interval between cancellation checks while idle
pub const DEFAULT_POLL_MS: u64 = 100;

/// A frame-level link, e.g. a raw socket bound to one interface.
pub trait Link {
    /// Sends one complete frame.
    fn send(&mut self, frame: &[u8]) -> io::Result<()>;

    /// Waits up to `timeout` for one frame.
    fn recv(&mut self, timeout: Duration) -> io::Result<Option<Vec<u8>>>;

    /// Installs a kernel-side filter. Links without filter support refuse.
    fn apply_filter(&mut self, expr: &str) -> io::Result<()> {
        Err(io::Error::new(
            ErrorKind::Unsupported,
            format!("filter '{expr}' is not supported by this link"),
        ))
    }

    fn interfaces(&self) -> Result<Vec<InterfaceInfo>, PacketError> {
        iface::list_interfaces()
    }
}

/// The async counterpart of [`Link`], driven by tokio.
pub trait AsyncLink {
    fn send(&mut self, frame: &[u8]) -> impl Future<Output = io::Result<()>> + Send;

    /// Resolves with the next frame. Must be cancel safe.
    fn recv(&mut self) -> impl Future<Output = io::Result<Vec<u8>>> + Send;

    /// Installs a kernel-side filter. Links without filter support refuse.
    fn apply_filter(&mut self, expr: &str) -> io::Result<()> {
        Err(io::Error::new(
            ErrorKind::Unsupported,
            format!("filter '{expr}' is not supported by this link"),
        ))
    }
}

/// Cooperative cancellation shared between a capture loop and its owner.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    inner: Arc<CancelState>,
}

#[derive(Debug, Default)]
struct CancelState {
    cancelled: AtomicBool,
    notify: Notify,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Resolves once [`cancel`](Self::cancel) has been called.
    pub async fn cancelled(&self) {
        loop {
            let notified = self.inner.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

/// Configuration for a capture loop
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Filter expression handed to the link
    pub filter: Option<String>,
    /// Stop after this long; `None` runs until cancelled or `count` is reached
    pub timeout_ms: Option<u64>,
    /// Longest single wait on the link before checking for cancellation
    pub poll_ms: u64,
    /// Stop after this many frames
    pub count: Option<usize>,
    /// Maximum bytes kept per frame
    pub snaplen: usize,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            filter: None,
            timeout_ms: None,
            poll_ms: DEFAULT_POLL_MS,
            count: None,
            snaplen: DEFAULT_SNAPLEN,
        }
    }
}

impl CaptureConfig {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    pub fn with_count(mut self, count: usize) -> Self {
        self.count = Some(count);
        self
    }

    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_ms.max(1))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopReason {
    Timeout,
    Cancelled,
    /// The configured frame count was reached.
    Count,
    /// The consumer asked to stop, e.g. a response was matched.
    Done,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureSummary {
    pub received: usize,
    pub elapsed: Duration,
    pub stop: StopReason,
}

/// Serializes `packet` completely, then sends it. Returns the frame length.
pub fn send<L, P>(link: &mut L, packet: &P) -> Result<usize, PacketError>
where
    L: Link + ?Sized,
    P: PacketBuilder + ?Sized,
{
    let frame = packet.build()?;
    link.send(&frame)?;
    trace!(len = frame.len(), "sent frame");
    Ok(frame.len())
}

/// Receives frames until timeout, cancellation or `config.count`, handing
/// each one, dissected, to `on_packet` before reading the next.
///
/// # Arguments
/// * `link` - Where frames come from
/// * `dissector` - Decodes each frame from the link's first layer
/// * `config` - Filter, timeout, count and snapshot length
/// * `cancel` - Stops the loop between two frames
/// * `on_packet` - Called once per received frame
///
/// # Returns
/// How many frames were received and why the loop stopped; link errors other
/// than timeouts and interruptions end the loop with an error
pub fn receive_loop<L, F>(
    link: &mut L,
    dissector: &Dissector<'_>,
    config: &CaptureConfig,
    cancel: &CancelToken,
    mut on_packet: F,
) -> Result<CaptureSummary, PacketError>
where
    L: Link + ?Sized,
    F: FnMut(DissectionResult),
{
    run_loop(link, dissector, config, cancel, |result| {
        on_packet(result);
        ControlFlow::Continue(())
    })
}

fn run_loop<L, F>(
    link: &mut L,
    dissector: &Dissector<'_>,
    config: &CaptureConfig,
    cancel: &CancelToken,
    mut on_packet: F,
) -> Result<CaptureSummary, PacketError>
where
    L: Link + ?Sized,
    F: FnMut(DissectionResult) -> ControlFlow<()>,
{
    if let Some(filter) = &config.filter {
        link.apply_filter(filter)?;
    }
    let started = Instant::now();
    let deadline = config.timeout().map(|timeout| started + timeout);
    let mut received = 0;
    info!(root = dissector.root().name(), timeout_ms = ?config.timeout_ms, "capture started");

    let stop = loop {
        if cancel.is_cancelled() {
            break StopReason::Cancelled;
        }
        if config.count.is_some_and(|count| received >= count) {
            break StopReason::Count;
        }
        let wait = match deadline {
            Some(deadline) => match deadline.checked_duration_since(Instant::now()) {
                Some(left) if !left.is_zero() => left.min(config.poll_interval()),
                _ => break StopReason::Timeout,
            },
            None => config.poll_interval(),
        };
        let mut frame = match link.recv(wait) {
            Ok(Some(frame)) => frame,
            Ok(None) => continue,
            Err(e) if is_transient(&e) => continue,
            Err(e) => return Err(e.into()),
        };
        frame.truncate(config.snaplen);
        received += 1;
        if on_packet(dissector.dissect(&frame)).is_break() {
            break StopReason::Done;
        }
    };

    let summary = CaptureSummary {
        received,
        elapsed: started.elapsed(),
        stop,
    };
    info!(received, stop = ?summary.stop, "capture stopped");
    Ok(summary)
}

pub(crate) fn is_transient(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        ErrorKind::WouldBlock | ErrorKind::TimedOut | ErrorKind::Interrupted
    )
}

/// Async [`receive_loop`]: races cancellation, the deadline and the link.
pub async fn receive_loop_async<L, F>(
    link: &mut L,
    dissector: &Dissector<'_>,
    config: &CaptureConfig,
    cancel: &CancelToken,
    mut on_packet: F,
) -> Result<CaptureSummary, PacketError>
where
    L: AsyncLink + ?Sized,
    F: FnMut(DissectionResult),
{
    enum Event {
        Cancelled,
        Timeout,
        Frame(io::Result<Vec<u8>>),
    }

    if let Some(filter) = &config.filter {
        link.apply_filter(filter)?;
    }
    let started = tokio::time::Instant::now();
    let deadline = config.timeout().map(|timeout| started + timeout);
    let mut received = 0;
    info!(root = dissector.root().name(), timeout_ms = ?config.timeout_ms, "async capture started");

    let stop = loop {
        if cancel.is_cancelled() {
            break StopReason::Cancelled;
        }
        if config.count.is_some_and(|count| received >= count) {
            break StopReason::Count;
        }
        let event = tokio::select! {
            biased;
            _ = cancel.cancelled() => Event::Cancelled,
            _ = until(deadline) => Event::Timeout,
            frame = link.recv() => Event::Frame(frame),
        };
        let mut frame = match event {
            Event::Cancelled => break StopReason::Cancelled,
            Event::Timeout => break StopReason::Timeout,
            Event::Frame(Ok(frame)) => frame,
            Event::Frame(Err(e)) if is_transient(&e) => continue,
            Event::Frame(Err(e)) => return Err(e.into()),
        };
        frame.truncate(config.snaplen);
        received += 1;
        on_packet(dissector.dissect(&frame));
    };

    let summary = CaptureSummary {
        received,
        elapsed: started.elapsed(),
        stop,
    };
    info!(received, stop = ?summary.stop, "async capture stopped");
    Ok(summary)
}

async fn until(deadline: Option<tokio::time::Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Collects the packets accepted by `keep`. `config.count` counts kept packets.
///
/// # Returns
/// The kept packets in arrival order, and the capture summary
pub fn sniff<L, K>(
    link: &mut L,
    dissector: &Dissector<'_>,
    config: &CaptureConfig,
    cancel: &CancelToken,
    mut keep: K,
) -> Result<(Vec<Packet>, CaptureSummary), PacketError>
where
    L: Link + ?Sized,
    K: FnMut(&Packet) -> bool,
{
    let wanted = config.count;
    let unbounded = CaptureConfig {
        count: None,
        ..config.clone()
    };
    let mut kept = Vec::new();
    let mut summary = run_loop(link, dissector, &unbounded, cancel, |result| {
        if keep(&result.packet) {
            kept.push(result.packet);
        }
        if wanted.is_some_and(|count| kept.len() >= count) {
            ControlFlow::Break(())
        } else {
            ControlFlow::Continue(())
        }
    })?;
    if summary.stop == StopReason::Done {
        summary.stop = StopReason::Count;
    }
    Ok((kept, summary))
}

/// Decides whether a received packet answers a request.
pub trait Correlate {
    fn answers(&self, request: &Packet, response: &Packet) -> bool;
}

impl<F> Correlate for F
where
    F: Fn(&Packet, &Packet) -> bool,
{
    fn answers(&self, request: &Packet, response: &Packet) -> bool {
        self(request, response)
    }
}

/// Field-based correlation: some fields equal on both sides, some pairs
/// swapped (a response's source is the request's destination).
///
/// Fields are named either plainly (first layer that has the field) or as
/// `Layer.field`, e.g. `IPv4.src`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldMatch {
    same: Vec<String>,
    swapped: Vec<(String, String)>,
}

impl FieldMatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn same(mut self, field: impl Into<String>) -> Self {
        self.same.push(field.into());
        self
    }

    pub fn swapped(mut self, a: impl Into<String>, b: impl Into<String>) -> Self {
        self.swapped.push((a.into(), b.into()));
        self
    }
}

fn field_of(packet: &Packet, path: &str) -> Option<Value> {
    match path.split_once('.') {
        Some((layer, field)) => packet.get_field(field, Some(packet.find(layer)?)),
        None => packet.get_field(path, None),
    }
}

fn agree(request: &Packet, a: &str, response: &Packet, b: &str) -> bool {
    match (field_of(request, a), field_of(response, b)) {
        (Some(x), Some(y)) => x == y,
        _ => false,
    }
}

impl Correlate for FieldMatch {
    fn answers(&self, request: &Packet, response: &Packet) -> bool {
        self.same.iter().all(|f| agree(request, f, response, f))
            && self
                .swapped
                .iter()
                .all(|(a, b)| agree(request, a, response, b) && agree(request, b, response, a))
    }
}

/// Sends `request` and waits for the first packet that answers it.
///
/// # Arguments
/// * `link` - Link to send on and listen to
/// * `dissector` - Decodes received frames
/// * `request` - Serialized completely before anything is sent
/// * `config` - Bounds the wait (`timeout_ms`) and the frames read (`count`)
/// * `cancel` - Stops waiting early
/// * `correlate` - Decides which received packet is the answer
///
/// # Returns
/// The answer, or `None` when the wait ended without one
pub fn send_and_match<L, C>(
    link: &mut L,
    dissector: &Dissector<'_>,
    request: &Packet,
    config: &CaptureConfig,
    cancel: &CancelToken,
    correlate: &C,
) -> Result<Option<Packet>, PacketError>
where
    L: Link + ?Sized,
    C: Correlate + ?Sized,
{
    send(link, request)?;
    let mut answer = None;
    run_loop(link, dissector, config, cancel, |result| {
        if correlate.answers(request, &result.packet) {
            answer = Some(result.packet);
            ControlFlow::Break(())
        } else {
            ControlFlow::Continue(())
        }
    })?;
    if answer.is_none() {
        debug!(request = %request.summary(), "no answer");
    }
    Ok(answer)
}

/// Requests paired with their answers, and the requests nobody answered.
#[derive(Debug, Clone, PartialEq)]
pub struct Exchange {
    pub answered: Vec<(Packet, Packet)>,
    pub unanswered: Vec<Packet>,
    pub summary: CaptureSummary,
}

/// Sends every request, then collects answers until all are matched, the
/// timeout expires or `cancel` fires. Every request is serialized before
/// the first one is sent.
pub fn send_and_collect<L, C>(
    link: &mut L,
    dissector: &Dissector<'_>,
    requests: &[Packet],
    config: &CaptureConfig,
    cancel: &CancelToken,
    correlate: &C,
) -> Result<Exchange, PacketError>
where
    L: Link + ?Sized,
    C: Correlate + ?Sized,
{
    let frames = requests
        .iter()
        .map(Packet::to_bytes)
        .collect::<Result<Vec<_>, _>>()?;
    for frame in &frames {
        link.send(frame)?;
    }
    debug!(requests = frames.len(), "sent requests");

    let mut pending: Vec<usize> = (0..requests.len()).collect();
    let mut answered = Vec::new();
    let summary = run_loop(link, dissector, config, cancel, |result| {
        if let Some(pos) = pending
            .iter()
            .position(|&i| correlate.answers(&requests[i], &result.packet))
        {
            let i = pending.remove(pos);
            answered.push((requests[i].clone(), result.packet));
        }
        if pending.is_empty() {
            ControlFlow::Break(())
        } else {
            ControlFlow::Continue(())
        }
    })?;

    Ok(Exchange {
        answered,
        unanswered: pending.into_iter().map(|i| requests[i].clone()).collect(),
        summary,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ip::{self, Ipv4Address};
    use crate::registry;
    use crate::{icmp, udp};
    use std::collections::VecDeque;

    /// In-memory link: frames queued in `inbox` are received in order, and
    /// `responder` may turn each sent frame into a reply.
    #[derive(Default)]
    struct ScriptedLink {
        inbox: VecDeque<Vec<u8>>,
        sent: Vec<Vec<u8>>,
        responder: Option<fn(&[u8]) -> Option<Vec<u8>>>,
    }

    impl Link for ScriptedLink {
        fn send(&mut self, frame: &[u8]) -> io::Result<()> {
            self.sent.push(frame.to_vec());
            if let Some(reply) = self.responder.and_then(|respond| respond(frame)) {
                self.inbox.push_back(reply);
            }
            Ok(())
        }

        fn recv(&mut self, timeout: Duration) -> io::Result<Option<Vec<u8>>> {
            match self.inbox.pop_front() {
                Some(frame) => Ok(Some(frame)),
                None => {
                    std::thread::sleep(timeout);
                    Ok(None)
                }
            }
        }
    }

    impl AsyncLink for ScriptedLink {
        fn send(&mut self, frame: &[u8]) -> impl Future<Output = io::Result<()>> + Send {
            let result = Link::send(self, frame);
            async move { result }
        }

        fn recv(&mut self) -> impl Future<Output = io::Result<Vec<u8>>> + Send {
            let next = self.inbox.pop_front();
            async move {
                match next {
                    Some(frame) => Ok(frame),
                    None => std::future::pending().await,
                }
            }
        }
    }

    fn host(last: u8) -> Ipv4Address {
        Ipv4Address::new([10, 0, 0, last])
    }

    fn ping(id: u16) -> Packet {
        ip::packet(host(1), host(2)).unwrap() / icmp::echo_request(id, 1, b"ping".to_vec()).unwrap()
    }

    /// Answers echo requests with odd identifiers.
    fn echo_responder(frame: &[u8]) -> Option<Vec<u8>> {
        let request = Packet::dissect(frame, ip::NAME).ok()?.packet;
        if request.get_field("id", Some(1))?.as_u64()? % 2 == 0 {
            return None;
        }
        let src = request.get_field("src", None)?;
        let dst = request.get_field("dst", None)?;
        let reply = request
            .clear_computed()
            .set_field("src", dst, None)
            .ok()?
            .set_field("dst", src, None)
            .ok()?
            .set_field("type", icmp::IcmpType::EchoReply as u8, None)
            .ok()?;
        reply.to_bytes().ok()
    }

    fn echo_match() -> FieldMatch {
        FieldMatch::new()
            .same("ICMP.id")
            .same("ICMP.seq")
            .swapped("IPv4.src", "IPv4.dst")
    }

    fn dissector() -> Dissector<'static> {
        Dissector::new(registry::global(), ip::NAME).unwrap()
    }

    fn short_timeout() -> CaptureConfig {
        CaptureConfig {
            poll_ms: 5,
            ..CaptureConfig::default()
        }
        .with_timeout(Duration::from_millis(30))
    }

    #[test]
    fn test_receive_loop_times_out() {
        let mut link = ScriptedLink::default();
        link.inbox.push_back(ping(1).to_bytes().unwrap());
        link.inbox.push_back(vec![0x45, 0x00]);

        let mut seen = Vec::new();
        let summary = receive_loop(&mut link, &dissector(), &short_timeout(), &CancelToken::new(), |result| {
            seen.push(result.status)
        })
        .unwrap();

        assert_eq!(summary.stop, StopReason::Timeout);
        assert_eq!(summary.received, 2);
        assert_eq!(seen, vec![crate::Status::Complete, crate::Status::Truncated]);
        assert!(summary.elapsed >= Duration::from_millis(30));
    }

    #[test]
    fn test_receive_loop_count_and_cancel() {
        let mut link = ScriptedLink::default();
        for id in 0..5 {
            link.inbox.push_back(ping(id).to_bytes().unwrap());
        }
        let config = CaptureConfig::default().with_count(3);
        let summary = receive_loop(&mut link, &dissector(), &config, &CancelToken::new(), |_| {}).unwrap();
        assert_eq!(summary.stop, StopReason::Count);
        assert_eq!(link.inbox.len(), 2);

        let cancel = CancelToken::new();
        cancel.cancel();
        let summary = receive_loop(&mut link, &dissector(), &config, &cancel, |_| {}).unwrap();
        assert_eq!(summary.stop, StopReason::Cancelled);
        assert_eq!(summary.received, 0);
    }

    #[test]
    fn test_filter_unsupported() {
        let mut link = ScriptedLink::default();
        let config = short_timeout().with_filter("icmp");
        let err = receive_loop(&mut link, &dissector(), &config, &CancelToken::new(), |_| {}).unwrap_err();
        assert!(matches!(err, PacketError::IoError(e) if e.kind() == ErrorKind::Unsupported));
    }

    #[tokio::test(start_paused = true)]
    async fn test_filter_unsupported_async() {
        let mut link = ScriptedLink::default();
        link.inbox.push_back(ping(1).to_bytes().unwrap());
        let config = CaptureConfig::default().with_filter("icmp");
        let mut received = 0;
        let err = receive_loop_async(&mut link, &dissector(), &config, &CancelToken::new(), |_| received += 1)
            .await
            .unwrap_err();
        assert!(matches!(err, PacketError::IoError(e) if e.kind() == ErrorKind::Unsupported));
        // The filter is refused before anything is read.
        assert_eq!(received, 0);
        assert_eq!(link.inbox.len(), 1);
    }

    #[test]
    fn test_send_serializes_first() {
        let mut link = ScriptedLink::default();
        let unresolvable = Packet::from(udp::layer());
        assert!(send(&mut link, &unresolvable).is_err());
        assert!(link.sent.is_empty());

        let len = send(&mut link, &ping(1)).unwrap();
        assert_eq!(link.sent, vec![ping(1).to_bytes().unwrap()]);
        assert_eq!(len, 32);
    }

    #[test]
    fn test_send_and_match() {
        let mut link = ScriptedLink {
            responder: Some(echo_responder),
            ..ScriptedLink::default()
        };
        // Unrelated traffic ahead of the answer.
        link.inbox.push_back(ping(7).to_bytes().unwrap());

        let request = ping(3);
        let answer = send_and_match(
            &mut link,
            &dissector(),
            &request,
            &short_timeout(),
            &CancelToken::new(),
            &echo_match(),
        )
        .unwrap()
        .expect("echo reply");
        assert_eq!(answer.get_field("type", Some(1)), Some(Value::Int(0)));
        assert_eq!(answer.get_field("src", None), Some(Value::Ipv4(host(2))));

        let unanswered = send_and_match(
            &mut link,
            &dissector(),
            &ping(4),
            &short_timeout(),
            &CancelToken::new(),
            &echo_match(),
        )
        .unwrap();
        assert!(unanswered.is_none());
    }

    #[test]
    fn test_send_and_collect() {
        let mut link = ScriptedLink {
            responder: Some(echo_responder),
            ..ScriptedLink::default()
        };
        let requests: Vec<Packet> = (1..=3).map(ping).collect();
        let exchange = send_and_collect(
            &mut link,
            &dissector(),
            &requests,
            &short_timeout(),
            &CancelToken::new(),
            &echo_match(),
        )
        .unwrap();

        assert_eq!(link.sent.len(), 3);
        assert_eq!(exchange.answered.len(), 2);
        assert_eq!(exchange.unanswered, vec![ping(2)]);
        assert_eq!(exchange.answered[0].0, ping(1));
        assert_eq!(exchange.summary.stop, StopReason::Timeout);
    }

    #[test]
    fn test_closure_correlation_and_sniff() {
        let mut link = ScriptedLink::default();
        for id in 0..6 {
            link.inbox.push_back(ping(id).to_bytes().unwrap());
        }
        let config = short_timeout().with_count(2);
        let (kept, summary) = sniff(&mut link, &dissector(), &config, &CancelToken::new(), |packet| {
            packet.get_field("id", Some(1)).and_then(|v| v.as_u64()).is_some_and(|id| id >= 3)
        })
        .unwrap();
        assert_eq!(kept.len(), 2);
        assert_eq!(summary.stop, StopReason::Count);
        assert_eq!(summary.received, 5);

        let same_id = |a: &Packet, b: &Packet| a.get_field("id", Some(1)) == b.get_field("id", Some(1));
        assert!(same_id.answers(&ping(4), &kept[1]));
    }

    #[test]
    fn test_config_serde() {
        let config: CaptureConfig = serde_json::from_str(r#"{"timeout_ms": 500, "count": 10}"#).unwrap();
        assert_eq!(config.timeout(), Some(Duration::from_millis(500)));
        assert_eq!(config.count, Some(10));
        assert_eq!(config.snaplen, DEFAULT_SNAPLEN);
        let json = serde_json::to_string(&config).unwrap();
        assert_eq!(serde_json::from_str::<CaptureConfig>(&json).unwrap(), config);
    }

    #[tokio::test(start_paused = true)]
    async fn test_receive_loop_async_timeout() {
        let mut link = ScriptedLink::default();
        for id in 0..3 {
            link.inbox.push_back(ping(id).to_bytes().unwrap());
        }
        let config = CaptureConfig::default().with_timeout(Duration::from_secs(5));
        let mut received = 0;
        let summary = receive_loop_async(&mut link, &dissector(), &config, &CancelToken::new(), |_| {
            received += 1
        })
        .await
        .unwrap();
        assert_eq!(received, 3);
        assert_eq!(summary.stop, StopReason::Timeout);
        assert!(summary.elapsed >= Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_receive_loop_async_cancel() {
        let mut link = ScriptedLink::default();
        let cancel = CancelToken::new();
        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            canceller.cancel();
        });

        let summary = receive_loop_async(&mut link, &dissector(), &CaptureConfig::default(), &cancel, |_| {})
            .await
            .unwrap();
        assert_eq!(summary.stop, StopReason::Cancelled);
        assert_eq!(summary.received, 0);
    }
}
