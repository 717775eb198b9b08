//! The session state machine (spec §4.3): `CONNECTING -> READY ->
//! LISTENING -> THINKING -> SPEAKING -> READY`, with a transition to
//! `CLOSED` from any state.

use ocn_domain::model::SessionState;

/// Inputs that drive a state transition. Distinct from `EventType`
/// because some transitions (response ready, heartbeat timeout) aren't
/// driven by an inbound device event at all.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Trigger {
    Hello,
    ListenStart,
    AudioChunk,
    ListenStop,
    ResponseReady,
    Heartbeat,
    CloseOrTimeout,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SideEffect {
    EmitHelloAck,
    OpenAudioBuffer,
    EmitSttPartialIfGrown,
    FinalizeTranscriptAndDispatch,
    BargeIn,
    EmitTtsStartThenChunksThenStop,
    EmitHeartbeatAck,
    PersistCloseReason,
    NoOp,
}

#[derive(Debug)]
pub struct TransitionError {
    pub from: SessionState,
    pub trigger: Trigger,
}

impl std::fmt::Display for TransitionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "no transition from {:?} on {:?}", self.from, self.trigger)
    }
}

/// Apply `trigger` to `from`, returning the next state and the side
/// effect the orchestrator must perform. `heartbeat` and `close`/timeout
/// are valid from any state; everything else is transition-table driven.
pub fn transition(from: SessionState, trigger: Trigger) -> Result<(SessionState, SideEffect), TransitionError> {
    use SessionState::*;
    use Trigger::*;

    match trigger {
        Heartbeat => return Ok((from, SideEffect::EmitHeartbeatAck)),
        CloseOrTimeout => return Ok((Closed, SideEffect::PersistCloseReason)),
        Hello => return Ok((Ready, SideEffect::EmitHelloAck)),
        _ => {}
    }

    match (from, trigger) {
        (Ready, ListenStart) => Ok((Listening, SideEffect::OpenAudioBuffer)),
        (Listening, AudioChunk) => Ok((Listening, SideEffect::EmitSttPartialIfGrown)),
        (Listening, ListenStop) => Ok((Thinking, SideEffect::FinalizeTranscriptAndDispatch)),
        (Speaking, ListenStart) => Ok((Listening, SideEffect::BargeIn)),
        (Thinking, ResponseReady) => Ok((Speaking, SideEffect::EmitTtsStartThenChunksThenStop)),
        (state, trigger) => Err(TransitionError { from: state, trigger }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use SessionState::*;

    #[test]
    fn hello_always_goes_to_ready() {
        let (state, effect) = transition(Connecting, Trigger::Hello).unwrap();
        assert_eq!(state, Ready);
        assert_eq!(effect, SideEffect::EmitHelloAck);

        let (state, _) = transition(Speaking, Trigger::Hello).unwrap();
        assert_eq!(state, Ready);
    }

    #[test]
    fn listen_start_while_speaking_is_barge_in() {
        let (state, effect) = transition(Speaking, Trigger::ListenStart).unwrap();
        assert_eq!(state, Listening);
        assert_eq!(effect, SideEffect::BargeIn);
    }

    #[test]
    fn listen_stop_moves_to_thinking() {
        let (state, effect) = transition(Listening, Trigger::ListenStop).unwrap();
        assert_eq!(state, Thinking);
        assert_eq!(effect, SideEffect::FinalizeTranscriptAndDispatch);
    }

    #[test]
    fn heartbeat_is_valid_from_any_state_and_does_not_change_it() {
        for s in [Connecting, Ready, Listening, Thinking, Speaking, Closed] {
            let (state, effect) = transition(s, Trigger::Heartbeat).unwrap();
            assert_eq!(state, s);
            assert_eq!(effect, SideEffect::EmitHeartbeatAck);
        }
    }

    #[test]
    fn close_or_timeout_always_closes() {
        let (state, _) = transition(Ready, Trigger::CloseOrTimeout).unwrap();
        assert_eq!(state, Closed);
    }

    #[test]
    fn invalid_transition_is_rejected() {
        assert!(transition(Ready, Trigger::AudioChunk).is_err());
        assert!(transition(Connecting, Trigger::ListenStop).is_err());
    }
}
