// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::runtime::fail::Fail;
use ::libc::EINVAL;
use ::std::fmt;

//======================================================================================================================
// Structures
//======================================================================================================================

/// Connection states of RFC 793.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum State {
    Closed,
    /// Passive open is not supported, so no connection ever enters this state.
    Listen,
    SynSent,
    SynReceived,
    Established,
    FinWait1,
    FinWait2,
    CloseWait,
    Closing,
    LastAck,
    TimeWait,
}

/// Things that move a connection from one state to another.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Event {
    /// The application asked for an active open. The SYN goes out with the transition.
    Connect,
    /// A SYN+ACK acknowledging our SYN arrived.
    SynAck,
    /// An acceptable ACK arrived.
    Ack,
    /// Our FIN was transmitted.
    SendFin,
    /// The remote's FIN arrived.
    Fin,
    /// Our FIN was acknowledged.
    FinAcked,
    /// A RST arrived.
    Reset,
    /// The TIME_WAIT/LAST_ACK linger expired.
    MslTimeout,
}

//======================================================================================================================
// Associated Functions
//======================================================================================================================

impl State {
    /// Computes the state that `event` leads to, or fails if `event` is not legal in this state.
    pub fn on_event(self, event: Event) -> Result<State, Fail> {
        let next: Option<State> = match (self, event) {
            (State::Closed, Event::Connect) => Some(State::SynSent),

            (State::SynSent, Event::SynAck) => Some(State::SynReceived),
            (State::SynSent, Event::Ack) => Some(State::Established),
            (State::SynSent, Event::Reset) => Some(State::Closed),
            (State::SynReceived, Event::Ack) => Some(State::Established),

            (State::Established, Event::SendFin) => Some(State::FinWait1),
            (State::Established, Event::Fin) => Some(State::CloseWait),
            (State::CloseWait, Event::SendFin) => Some(State::LastAck),

            (State::FinWait1, Event::FinAcked) => Some(State::FinWait2),
            (State::FinWait1, Event::Fin) => Some(State::Closing),
            (State::FinWait2, Event::Fin) => Some(State::TimeWait),
            (State::Closing, Event::FinAcked) => Some(State::TimeWait),
            (State::LastAck, Event::FinAcked) => Some(State::Closed),

            (State::TimeWait, Event::MslTimeout) | (State::LastAck, Event::MslTimeout) => Some(State::Closed),

            (state, Event::Reset) if state.is_synchronized() => Some(State::Closed),

            _ => None,
        };
        match next {
            Some(next) => {
                debug!("on_event(): {:?} --{:?}--> {:?}", self, event, next);
                Ok(next)
            },
            None => {
                let cause: String = format!("illegal transition (state={:?}, event={:?})", self, event);
                warn!("on_event(): {}", cause);
                Err(Fail::new(EINVAL, &cause))
            },
        }
    }

    /// Whether both sides have exchanged initial sequence numbers.
    pub fn is_synchronized(self) -> bool {
        !matches!(self, State::Closed | State::Listen | State::SynSent)
    }

    /// Whether inbound data is still delivered to the application.
    pub fn accepts_data(self) -> bool {
        matches!(self, State::Established | State::FinWait1 | State::FinWait2)
    }

    /// Whether our FIN has already been queued, so that no more data may be written.
    pub fn has_sent_fin(self) -> bool {
        matches!(
            self,
            State::FinWait1 | State::FinWait2 | State::Closing | State::LastAck | State::TimeWait
        )
    }

    /// Whether the remote's FIN has been received.
    pub fn has_received_fin(self) -> bool {
        matches!(
            self,
            State::CloseWait | State::Closing | State::LastAck | State::TimeWait
        )
    }
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name: &str = match self {
            State::Closed => "CLOSED",
            State::Listen => "LISTEN",
            State::SynSent => "SYN_SENT",
            State::SynReceived => "SYN_RECEIVED",
            State::Established => "ESTABLISHED",
            State::FinWait1 => "FIN_WAIT1",
            State::FinWait2 => "FIN_WAIT2",
            State::CloseWait => "CLOSE_WAIT",
            State::Closing => "CLOSING",
            State::LastAck => "LAST_ACK",
            State::TimeWait => "TIME_WAIT",
        };
        write!(f, "{}", name)
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================

#[cfg(test)]
mod tests {
    use super::{
        Event,
        State,
    };
    use ::anyhow::Result;
    use ::libc::EINVAL;

    /// Walks `events` from `state`, returning the final state.
    fn walk(mut state: State, events: &[Event]) -> Result<State> {
        for event in events {
            state = state.on_event(*event)?;
        }
        Ok(state)
    }

    #[test]
    fn active_open() -> Result<()> {
        crate::ensure_eq!(
            walk(State::Closed, &[Event::Connect, Event::SynAck, Event::Ack])?,
            State::Established
        );
        crate::ensure_eq!(walk(State::Closed, &[Event::Connect, Event::Ack])?, State::Established);
        crate::ensure_eq!(walk(State::Closed, &[Event::Connect, Event::Reset])?, State::Closed);
        Ok(())
    }

    #[test]
    fn active_close() -> Result<()> {
        let established: State = State::Established;
        crate::ensure_eq!(
            walk(established, &[Event::SendFin, Event::FinAcked, Event::Fin, Event::MslTimeout])?,
            State::Closed
        );
        crate::ensure_eq!(
            walk(established, &[Event::SendFin, Event::Fin, Event::FinAcked])?,
            State::TimeWait
        );
        Ok(())
    }

    #[test]
    fn passive_close() -> Result<()> {
        crate::ensure_eq!(
            walk(State::Established, &[Event::Fin, Event::SendFin])?,
            State::LastAck
        );
        crate::ensure_eq!(State::LastAck.on_event(Event::FinAcked)?, State::Closed);
        crate::ensure_eq!(State::LastAck.on_event(Event::MslTimeout)?, State::Closed);
        Ok(())
    }

    #[test]
    fn illegal_transitions() -> Result<()> {
        crate::ensure_eq!(State::Closed.on_event(Event::Ack).err().map(|e| e.errno), Some(EINVAL));
        crate::ensure_eq!(State::Established.on_event(Event::Connect).err().map(|e| e.errno), Some(EINVAL));
        crate::ensure_eq!(State::FinWait2.on_event(Event::SendFin).err().map(|e| e.errno), Some(EINVAL));
        crate::ensure_eq!(State::Closed.on_event(Event::Reset).err().map(|e| e.errno), Some(EINVAL));
        for event in [Event::Connect, Event::SynAck, Event::Ack, Event::Fin, Event::Reset] {
            crate::ensure_eq!(State::Listen.on_event(event).is_err(), true);
        }
        Ok(())
    }

    #[test]
    fn reset_closes_synchronized_states() -> Result<()> {
        for state in [
            State::SynReceived,
            State::Established,
            State::FinWait1,
            State::FinWait2,
            State::CloseWait,
            State::Closing,
            State::LastAck,
            State::TimeWait,
        ] {
            crate::ensure_eq!(state.on_event(Event::Reset)?, State::Closed);
        }
        Ok(())
    }
}
