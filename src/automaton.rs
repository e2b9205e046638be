//! State machines that talk over a [`Link`].
//!
//! An [`Automaton`] is a set of named states and the conditions that move
//! between them. On entering a state its entry conditions run in priority
//! order (lowest first). If none fires, the automaton listens: every received
//! packet that passes the master filter is offered to the state's receive
//! conditions, and timeout conditions fire once their delay since entry has
//! passed. A condition fires by returning a [`Transition`]; the actions bound
//! to it then run, again by priority. Packets queued with [`Ctx::send`] are
//! serialized and sent as soon as the condition or action that queued them
//! returns.

use std::collections::HashSet;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use indexmap::IndexMap;
use tracing::{debug, info, trace};

use crate::PacketError;
use crate::capture::{self, CancelToken, Correlate, DEFAULT_POLL_MS, Link};
use crate::codec::Dissector;
use crate::packet::Packet;
use crate::registry;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateKind {
    Initial,
    Normal,
    /// Reaching it ends the run successfully.
    Final,
    /// Reaching it ends the run with [`PacketError::AutomatonErrorState`].
    Error,
}

/// The state a firing condition moves to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    to: String,
}

impl Transition {
    pub fn to(state: impl Into<String>) -> Option<Self> {
        Some(Self { to: state.into() })
    }

    pub fn target(&self) -> &str {
        &self.to
    }
}

/// What conditions and actions see.
pub struct Ctx<'a, D> {
    pub data: &'a mut D,
    packet: Option<&'a Packet>,
    last_sent: Option<&'a Packet>,
    outbox: &'a mut Vec<Packet>,
}

impl<D> Ctx<'_, D> {
    /// The received packet being offered, for receive conditions and their actions.
    pub fn packet(&self) -> Option<&Packet> {
        self.packet
    }

    /// Queues a packet for sending.
    pub fn send(&mut self, packet: Packet) {
        self.outbox.push(packet);
    }

    /// Whether the received packet answers the last packet sent.
    pub fn answers<C: Correlate + ?Sized>(&self, correlate: &C) -> bool {
        match (self.last_sent, self.packet) {
            (Some(request), Some(response)) => correlate.answers(request, response),
            _ => false,
        }
    }
}

type ConditionFn<D> = Box<dyn Fn(&mut Ctx<'_, D>) -> Option<Transition> + Send>;
type ActionFn<D> = Box<dyn Fn(&mut Ctx<'_, D>) + Send>;
type FilterFn = Box<dyn Fn(&Packet) -> bool + Send>;

#[derive(Debug, Clone, Copy, PartialEq)]
enum Trigger {
    Enter,
    Receive,
    Timeout(Duration),
}

struct Condition<D> {
    state: String,
    name: String,
    priority: i32,
    trigger: Trigger,
    check: ConditionFn<D>,
}

struct Action<D> {
    condition: String,
    priority: i32,
    run: ActionFn<D>,
}

/// How far a [`step`](Automaton::step) or [`run`](Automaton::run) got.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Progress {
    Moved { from: String, to: String },
    Finished(String),
    /// Stopped on entering a state with a breakpoint; running again continues from it.
    Breakpoint(String),
    Cancelled(String),
}

pub struct AutomatonBuilder<D> {
    data: D,
    dissector: Option<Dissector<'static>>,
    root: String,
    states: IndexMap<String, StateKind>,
    conditions: Vec<Condition<D>>,
    actions: Vec<Action<D>>,
    master_filter: Option<FilterFn>,
    poll: Duration,
}

impl<D> AutomatonBuilder<D> {
    pub fn state(mut self, name: impl Into<String>, kind: StateKind) -> Self {
        self.states.insert(name.into(), kind);
        self
    }

    /// A condition checked once, on entering `state`.
    pub fn condition<F>(self, state: &str, name: &str, priority: i32, check: F) -> Self
    where
        F: Fn(&mut Ctx<'_, D>) -> Option<Transition> + Send + 'static,
    {
        self.add(state, name, priority, Trigger::Enter, Box::new(check))
    }

    /// A condition checked against every packet received while in `state`.
    pub fn receive_condition<F>(self, state: &str, name: &str, priority: i32, check: F) -> Self
    where
        F: Fn(&mut Ctx<'_, D>) -> Option<Transition> + Send + 'static,
    {
        self.add(state, name, priority, Trigger::Receive, Box::new(check))
    }

    /// A condition checked once, `after` entering `state`.
    pub fn timeout<F>(self, state: &str, after: Duration, name: &str, check: F) -> Self
    where
        F: Fn(&mut Ctx<'_, D>) -> Option<Transition> + Send + 'static,
    {
        self.add(state, name, 0, Trigger::Timeout(after), Box::new(check))
    }

    /// Runs when the named condition fires.
    pub fn action<F>(mut self, condition: &str, priority: i32, run: F) -> Self
    where
        F: Fn(&mut Ctx<'_, D>) + Send + 'static,
    {
        self.actions.push(Action {
            condition: condition.to_string(),
            priority,
            run: Box::new(run),
        });
        self
    }

    /// Drops received packets before any receive condition sees them.
    pub fn master_filter<F>(mut self, filter: F) -> Self
    where
        F: Fn(&Packet) -> bool + Send + 'static,
    {
        self.master_filter = Some(Box::new(filter));
        self
    }

    pub fn dissector(mut self, dissector: Dissector<'static>) -> Self {
        self.dissector = Some(dissector);
        self
    }

    /// Longest single wait on the link before checking for cancellation.
    pub fn poll_interval(mut self, poll: Duration) -> Self {
        self.poll = poll.max(Duration::from_millis(1));
        self
    }

    fn add(mut self, state: &str, name: &str, priority: i32, trigger: Trigger, check: ConditionFn<D>) -> Self {
        self.conditions.push(Condition {
            state: state.to_string(),
            name: name.to_string(),
            priority,
            trigger,
            check,
        });
        self
    }

    /// Checks that there is exactly one initial state and that every
    /// condition and action refers to something defined.
    pub fn build(mut self) -> Result<Automaton<D>, PacketError> {
        let mut initial = self
            .states
            .iter()
            .filter(|(_, kind)| **kind == StateKind::Initial)
            .map(|(name, _)| name.clone());
        let start = match (initial.next(), initial.next()) {
            (Some(start), None) => start,
            (None, _) => return Err(PacketError::InvalidOperation("automaton has no initial state".into())),
            (Some(a), Some(b)) => {
                return Err(PacketError::InvalidOperation(format!(
                    "automaton has several initial states ('{a}', '{b}')"
                )));
            }
        };
        if let Some(condition) = self.conditions.iter().find(|c| !self.states.contains_key(&c.state)) {
            return Err(PacketError::InvalidOperation(format!(
                "condition '{}' is attached to unknown state '{}'",
                condition.name, condition.state
            )));
        }
        if let Some(action) = self
            .actions
            .iter()
            .find(|a| !self.conditions.iter().any(|c| c.name == a.condition))
        {
            return Err(PacketError::InvalidOperation(format!(
                "action is bound to unknown condition '{}'",
                action.condition
            )));
        }

        self.conditions.sort_by_key(|c| match c.trigger {
            Trigger::Timeout(after) => (c.priority, after),
            _ => (c.priority, Duration::ZERO),
        });
        self.actions.sort_by_key(|a| a.priority);
        let dissector = match self.dissector {
            Some(dissector) => dissector,
            None => Dissector::new(registry::global(), &self.root)?,
        };

        Ok(Automaton {
            data: self.data,
            dissector,
            states: self.states,
            conditions: self.conditions,
            actions: self.actions,
            master_filter: self.master_filter,
            poll: self.poll,
            current: start,
            breakpoints: HashSet::new(),
            at_breakpoint: false,
            sent: Vec::new(),
            received: Vec::new(),
        })
    }
}

pub struct Automaton<D> {
    data: D,
    dissector: Dissector<'static>,
    states: IndexMap<String, StateKind>,
    conditions: Vec<Condition<D>>,
    actions: Vec<Action<D>>,
    master_filter: Option<FilterFn>,
    poll: Duration,
    current: String,
    breakpoints: HashSet<String>,
    at_breakpoint: bool,
    sent: Vec<Packet>,
    received: Vec<Packet>,
}

impl<D> Automaton<D> {
    /// Starts a definition. Received frames are dissected from `root` in the
    /// global registry unless another dissector is given.
    pub fn builder(root: &str, data: D) -> AutomatonBuilder<D> {
        AutomatonBuilder {
            data,
            dissector: None,
            root: root.to_string(),
            states: IndexMap::new(),
            conditions: Vec::new(),
            actions: Vec::new(),
            master_filter: None,
            poll: Duration::from_millis(DEFAULT_POLL_MS),
        }
    }

    pub fn data(&self) -> &D {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut D {
        &mut self.data
    }

    pub fn into_data(self) -> D {
        self.data
    }

    pub fn state(&self) -> &str {
        &self.current
    }

    /// Every packet sent so far, in order.
    pub fn sent(&self) -> &[Packet] {
        &self.sent
    }

    /// Every received packet that fired a receive condition.
    pub fn received(&self) -> &[Packet] {
        &self.received
    }

    pub fn add_breakpoint(&mut self, state: impl Into<String>) {
        self.breakpoints.insert(state.into());
    }

    pub fn remove_breakpoint(&mut self, state: &str) {
        self.breakpoints.remove(state);
    }

    /// Runs until a final state, a breakpoint or cancellation.
    pub fn run<L>(&mut self, link: &mut L, cancel: &CancelToken) -> Result<Progress, PacketError>
    where
        L: Link + ?Sized,
    {
        info!(state = %self.current, "automaton started");
        loop {
            match self.step(link, cancel)? {
                Progress::Moved { .. } => continue,
                stop => {
                    info!(state = %self.current, progress = ?stop, "automaton stopped");
                    return Ok(stop);
                }
            }
        }
    }

    /// Runs on a thread of its own; the automaton and the link come back with the result.
    pub fn spawn<L>(mut self, mut link: L, cancel: CancelToken) -> JoinHandle<(Self, L, Result<Progress, PacketError>)>
    where
        D: Send + 'static,
        L: Link + Send + 'static,
    {
        thread::spawn(move || {
            let result = self.run(&mut link, &cancel);
            (self, link, result)
        })
    }

    /// Visits the current state once: runs its entry conditions, then
    /// listens until a receive or timeout condition fires.
    pub fn step<L>(&mut self, link: &mut L, cancel: &CancelToken) -> Result<Progress, PacketError>
    where
        L: Link + ?Sized,
    {
        let state = self.current.clone();
        if self.breakpoints.contains(&state) && !self.at_breakpoint {
            self.at_breakpoint = true;
            debug!(%state, "breakpoint");
            return Ok(Progress::Breakpoint(state));
        }
        match self.states.get(&state) {
            Some(StateKind::Final) => return Ok(Progress::Finished(state)),
            Some(StateKind::Error) => return Err(PacketError::AutomatonErrorState(state)),
            Some(_) => {}
            None => return Err(PacketError::InvalidOperation(format!("unknown state '{state}'"))),
        }

        let in_state = |trigger: fn(&Trigger) -> bool| -> Vec<usize> {
            self.conditions
                .iter()
                .enumerate()
                .filter(|(_, c)| c.state == state && trigger(&c.trigger))
                .map(|(i, _)| i)
                .collect()
        };
        let entry = in_state(|t| *t == Trigger::Enter);
        let receive = in_state(|t| *t == Trigger::Receive);
        let timeouts = in_state(|t| matches!(t, Trigger::Timeout(_)));

        for index in entry {
            if let Some(transition) = self.evaluate(link, index, None)? {
                return self.transition(link, index, transition, None);
            }
        }

        let entered = Instant::now();
        let mut pending = timeouts.into_iter().peekable();
        loop {
            if cancel.is_cancelled() {
                return Ok(Progress::Cancelled(state));
            }
            while let Some(&index) = pending.peek() {
                if entered.elapsed() < self.delay(index) {
                    break;
                }
                pending.next();
                if let Some(transition) = self.evaluate(link, index, None)? {
                    return self.transition(link, index, transition, None);
                }
            }
            let wait = match pending.peek() {
                Some(&index) => self.delay(index).saturating_sub(entered.elapsed()).min(self.poll),
                None if receive.is_empty() => return Err(PacketError::AutomatonStuck(state)),
                None => self.poll,
            };

            let frame = match link.recv(wait) {
                Ok(Some(frame)) => frame,
                Ok(None) => continue,
                Err(e) if capture::is_transient(&e) => continue,
                Err(e) => return Err(e.into()),
            };
            let packet = self.dissector.dissect(&frame).packet;
            if self.master_filter.as_ref().is_some_and(|keep| !keep(&packet)) {
                trace!(summary = %packet.summary(), "filtered out");
                continue;
            }
            for &index in &receive {
                if let Some(transition) = self.evaluate(link, index, Some(&packet))? {
                    self.received.push(packet.clone());
                    return self.transition(link, index, transition, Some(&packet));
                }
            }
        }
    }

    fn delay(&self, index: usize) -> Duration {
        match self.conditions[index].trigger {
            Trigger::Timeout(after) => after,
            _ => Duration::ZERO,
        }
    }

    fn evaluate<L>(&mut self, link: &mut L, index: usize, packet: Option<&Packet>) -> Result<Option<Transition>, PacketError>
    where
        L: Link + ?Sized,
    {
        let mut outbox = Vec::new();
        let transition = {
            let mut ctx = Ctx {
                data: &mut self.data,
                packet,
                last_sent: self.sent.last(),
                outbox: &mut outbox,
            };
            (self.conditions[index].check)(&mut ctx)
        };
        self.flush(link, outbox)?;
        Ok(transition)
    }

    fn transition<L>(
        &mut self,
        link: &mut L,
        index: usize,
        transition: Transition,
        packet: Option<&Packet>,
    ) -> Result<Progress, PacketError>
    where
        L: Link + ?Sized,
    {
        if !self.states.contains_key(&transition.to) {
            return Err(PacketError::InvalidOperation(format!(
                "condition '{}' moves to unknown state '{}'",
                self.conditions[index].name, transition.to
            )));
        }
        let condition = self.conditions[index].name.clone();
        for a in 0..self.actions.len() {
            if self.actions[a].condition != condition {
                continue;
            }
            let mut outbox = Vec::new();
            {
                let mut ctx = Ctx {
                    data: &mut self.data,
                    packet,
                    last_sent: self.sent.last(),
                    outbox: &mut outbox,
                };
                (self.actions[a].run)(&mut ctx);
            }
            self.flush(link, outbox)?;
        }

        let from = std::mem::replace(&mut self.current, transition.to);
        self.at_breakpoint = false;
        debug!(%from, to = %self.current, %condition, "transition");
        Ok(Progress::Moved {
            from,
            to: self.current.clone(),
        })
    }

    fn flush<L>(&mut self, link: &mut L, outbox: Vec<Packet>) -> Result<(), PacketError>
    where
        L: Link + ?Sized,
    {
        for packet in outbox {
            capture::send(link, &packet)?;
            self.sent.push(packet);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::FieldMatch;
    use crate::icmp;
    use crate::ip::{self, Ipv4Address};
    use std::collections::VecDeque;
    use std::io;

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
                    thread::sleep(timeout);
                    Ok(None)
                }
            }
        }
    }

    fn host(last: u8) -> Ipv4Address {
        Ipv4Address::new([10, 0, 0, last])
    }

    fn ping(seq: u16) -> Packet {
        ip::packet(host(1), host(2)).unwrap() / icmp::echo_request(7, seq, b"ping".to_vec()).unwrap()
    }

    /// Answers every echo request.
    fn echo_responder(frame: &[u8]) -> Option<Vec<u8>> {
        let request = Packet::dissect(frame, ip::NAME).ok()?.packet;
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

    #[derive(Debug, Default)]
    struct Pinger {
        seq: u16,
        retries: u32,
        replies: u32,
    }

    /// BEGIN sends a ping; WAIT retries twice on timeout, then gives up.
    fn pinger() -> AutomatonBuilder<Pinger> {
        let matcher = echo_match();
        Automaton::builder(ip::NAME, Pinger::default())
            .state("BEGIN", StateKind::Initial)
            .state("WAIT", StateKind::Normal)
            .state("END", StateKind::Final)
            .state("FAILED", StateKind::Error)
            .condition("BEGIN", "start", 0, |ctx| {
                ctx.data.seq = 1;
                ctx.send(ping(1));
                Transition::to("WAIT")
            })
            .receive_condition("WAIT", "answered", 0, move |ctx| {
                if ctx.answers(&matcher) { Transition::to("END") } else { None }
            })
            .timeout("WAIT", Duration::from_millis(20), "retry", |ctx| {
                if ctx.data.retries == 2 {
                    return Transition::to("FAILED");
                }
                ctx.data.retries += 1;
                ctx.data.seq += 1;
                ctx.send(ping(ctx.data.seq));
                Transition::to("WAIT")
            })
            .action("answered", 0, |ctx| ctx.data.replies += 1)
            .poll_interval(Duration::from_millis(5))
    }

    #[test]
    fn test_run_to_final_state() {
        let mut link = ScriptedLink {
            responder: Some(echo_responder),
            ..ScriptedLink::default()
        };
        let mut automaton = pinger().build().unwrap();
        let progress = automaton.run(&mut link, &CancelToken::new()).unwrap();

        assert_eq!(progress, Progress::Finished("END".into()));
        assert_eq!(automaton.state(), "END");
        assert_eq!(automaton.sent(), &[ping(1)]);
        assert_eq!(automaton.received().len(), 1);
        assert_eq!(automaton.received()[0].get_field("type", Some(1)).and_then(|v| v.as_u64()), Some(0));
        assert_eq!(automaton.data().replies, 1);
        assert_eq!(link.sent.len(), 1);
    }

    #[test]
    fn test_timeouts_lead_to_error_state() {
        let mut link = ScriptedLink::default();
        let mut automaton = pinger().build().unwrap();
        let err = automaton.run(&mut link, &CancelToken::new()).unwrap_err();

        assert!(matches!(err, PacketError::AutomatonErrorState(state) if state == "FAILED"));
        assert_eq!(automaton.data().retries, 2);
        assert_eq!(automaton.sent(), &[ping(1), ping(2), ping(3)]);
        assert_eq!(automaton.data().replies, 0);
    }

    #[test]
    fn test_master_filter_hides_replies() {
        let mut link = ScriptedLink {
            responder: Some(echo_responder),
            ..ScriptedLink::default()
        };
        let mut automaton = pinger().master_filter(|packet| packet.find("TCP").is_some()).build().unwrap();
        assert!(automaton.run(&mut link, &CancelToken::new()).is_err());
        assert!(automaton.received().is_empty());
        assert_eq!(link.sent.len(), 3);
    }

    #[test]
    fn test_breakpoint_and_resume() {
        let mut link = ScriptedLink {
            responder: Some(echo_responder),
            ..ScriptedLink::default()
        };
        let mut automaton = pinger().build().unwrap();
        automaton.add_breakpoint("WAIT");

        let progress = automaton.run(&mut link, &CancelToken::new()).unwrap();
        assert_eq!(progress, Progress::Breakpoint("WAIT".into()));
        assert_eq!(automaton.sent().len(), 1);

        let progress = automaton.run(&mut link, &CancelToken::new()).unwrap();
        assert_eq!(progress, Progress::Finished("END".into()));
    }

    #[test]
    fn test_step_reports_each_move() {
        let mut link = ScriptedLink {
            responder: Some(echo_responder),
            ..ScriptedLink::default()
        };
        let mut automaton = pinger().build().unwrap();
        let cancel = CancelToken::new();
        assert_eq!(
            automaton.step(&mut link, &cancel).unwrap(),
            Progress::Moved {
                from: "BEGIN".into(),
                to: "WAIT".into()
            }
        );
        assert_eq!(
            automaton.step(&mut link, &cancel).unwrap(),
            Progress::Moved {
                from: "WAIT".into(),
                to: "END".into()
            }
        );
        assert_eq!(automaton.step(&mut link, &cancel).unwrap(), Progress::Finished("END".into()));
    }

    #[test]
    fn test_priorities_order_conditions_and_actions() {
        let automaton = Automaton::builder(ip::NAME, Vec::<&'static str>::new())
            .state("A", StateKind::Initial)
            .state("B", StateKind::Final)
            .state("C", StateKind::Final)
            .condition("A", "late", 5, |_| Transition::to("C"))
            .condition("A", "early", -1, |_| Transition::to("B"))
            .action("early", 2, |ctx| ctx.data.push("second"))
            .action("early", 1, |ctx| ctx.data.push("first"))
            .action("late", 0, |ctx| ctx.data.push("never"))
            .build();
        let mut automaton = automaton.unwrap();
        let progress = automaton.run(&mut ScriptedLink::default(), &CancelToken::new()).unwrap();
        assert_eq!(progress, Progress::Finished("B".into()));
        assert_eq!(automaton.into_data(), vec!["first", "second"]);
    }

    #[test]
    fn test_stuck_state() {
        let mut automaton = Automaton::builder(ip::NAME, ())
            .state("IDLE", StateKind::Initial)
            .condition("IDLE", "never", 0, |_| None)
            .build()
            .unwrap();
        let err = automaton.run(&mut ScriptedLink::default(), &CancelToken::new()).unwrap_err();
        assert!(matches!(err, PacketError::AutomatonStuck(state) if state == "IDLE"));
    }

    #[test]
    fn test_cancelled_while_listening() {
        let mut automaton = Automaton::builder(ip::NAME, ())
            .state("LISTEN", StateKind::Initial)
            .receive_condition("LISTEN", "anything", 0, |_| None)
            .build()
            .unwrap();
        let cancel = CancelToken::new();
        cancel.cancel();
        let progress = automaton.run(&mut ScriptedLink::default(), &cancel).unwrap();
        assert_eq!(progress, Progress::Cancelled("LISTEN".into()));
    }

    #[test]
    fn test_spawn_and_cancel_from_outside() {
        let automaton = Automaton::builder(ip::NAME, ())
            .state("LISTEN", StateKind::Initial)
            .receive_condition("LISTEN", "anything", 0, |_| None)
            .poll_interval(Duration::from_millis(5))
            .build()
            .unwrap();
        let cancel = CancelToken::new();
        let handle = automaton.spawn(ScriptedLink::default(), cancel.clone());
        thread::sleep(Duration::from_millis(20));
        cancel.cancel();
        let (automaton, _link, result) = handle.join().unwrap();
        assert_eq!(result.unwrap(), Progress::Cancelled("LISTEN".into()));
        assert_eq!(automaton.state(), "LISTEN");
    }

    #[test]
    fn test_spawn_runs_to_completion() {
        let link = ScriptedLink {
            responder: Some(echo_responder),
            ..ScriptedLink::default()
        };
        let handle = pinger().build().unwrap().spawn(link, CancelToken::new());
        let (automaton, link, result) = handle.join().unwrap();
        assert_eq!(result.unwrap(), Progress::Finished("END".into()));
        assert_eq!(link.sent.len(), 1);
        assert_eq!(automaton.data().replies, 1);
    }

    #[test]
    fn test_build_validation() {
        let no_initial = Automaton::builder(ip::NAME, ()).state("A", StateKind::Normal).build();
        assert!(matches!(no_initial, Err(PacketError::InvalidOperation(_))));

        let two_initial = Automaton::builder(ip::NAME, ())
            .state("A", StateKind::Initial)
            .state("B", StateKind::Initial)
            .build();
        assert!(matches!(two_initial, Err(PacketError::InvalidOperation(_))));

        let unknown_state = Automaton::builder(ip::NAME, ())
            .state("A", StateKind::Initial)
            .condition("Z", "c", 0, |_| None)
            .build();
        assert!(matches!(unknown_state, Err(PacketError::InvalidOperation(_))));

        let unknown_condition = Automaton::builder(ip::NAME, ())
            .state("A", StateKind::Initial)
            .action("missing", 0, |_| {})
            .build();
        assert!(matches!(unknown_condition, Err(PacketError::InvalidOperation(_))));

        let unknown_root = Automaton::builder("NoSuchLayer", ()).state("A", StateKind::Initial).build();
        assert!(matches!(unknown_root, Err(PacketError::UnknownLayer(_))));
    }

    #[test]
    fn test_transition_to_unknown_state() {
        let mut automaton = Automaton::builder(ip::NAME, ())
            .state("A", StateKind::Initial)
            .condition("A", "jump", 0, |_| Transition::to("NOWHERE"))
            .build()
            .unwrap();
        let err = automaton.run(&mut ScriptedLink::default(), &CancelToken::new()).unwrap_err();
        assert!(matches!(err, PacketError::InvalidOperation(reason) if reason.contains("NOWHERE")));
        assert_eq!(automaton.state(), "A");
    }
}
