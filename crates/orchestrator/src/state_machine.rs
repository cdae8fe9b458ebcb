use callbridge_core::CallStatus;

use crate::error::{OrchestratorError, Result};
use crate::event::{CallEvent, EndReason};

/// Effect of an event on a call, once it has been judged applicable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    To(CallStatus),
    AppendTranscript,
    RecordSessionEnded,
}

pub struct CallStateMachine;

impl CallStateMachine {
    /// Resolve the effect of `event` on a call currently in `from`.
    pub fn transition_for(from: CallStatus, event: &CallEvent) -> Result<Transition> {
        use CallStatus::*;

        let invalid = || OrchestratorError::InvalidTransition {
            from,
            event: event.to_string(),
        };

        let transition = match (event, from) {
            (CallEvent::TelephonyAccepted { .. }, Pending) => Transition::To(Initiating),
            (CallEvent::CallRinging, Initiating) => Transition::To(Ringing),
            (CallEvent::CallAnswered, Initiating | Ringing) => Transition::To(InProgress),
            (CallEvent::VoiceSessionEnded { .. }, Pending | Initiating | Ringing) => {
                Transition::To(Failed)
            }
            (CallEvent::VoiceSessionEnded { .. }, InProgress) => Transition::RecordSessionEnded,
            (CallEvent::CallEnded { reason, .. }, _) => {
                let to = match reason {
                    EndReason::Normal => Completed,
                    EndReason::NoAnswer => NoAnswer,
                    EndReason::Busy => Busy,
                    EndReason::Cancelled => Cancelled,
                    EndReason::Error => Failed,
                };
                Self::validate_transition(&from, &to).map_err(|_| invalid())?;
                Transition::To(to)
            }
            (CallEvent::TranscriptFragment(_), InProgress) => Transition::AppendTranscript,
            _ => return Err(invalid()),
        };

        Ok(transition)
    }

    pub fn validate_transition(from: &CallStatus, to: &CallStatus) -> Result<()> {
        if Self::allowed_transitions(from).contains(to) {
            Ok(())
        } else {
            Err(OrchestratorError::InvalidTransition {
                from: *from,
                event: format!("transition to {}", to),
            })
        }
    }

    fn allowed_transitions(from: &CallStatus) -> &'static [CallStatus] {
        use CallStatus::*;

        match from {
            Pending => &[Initiating, Failed, Cancelled],
            Initiating => &[Ringing, InProgress, Failed, NoAnswer, Busy, Cancelled],
            Ringing => &[InProgress, Failed, NoAnswer, Busy, Cancelled],
            InProgress => &[Completed, Failed],
            Completed | Failed | NoAnswer | Busy | Cancelled => &[],
        }
    }

    pub fn can_transition(from: &CallStatus, to: &CallStatus) -> bool {
        Self::validate_transition(from, to).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ended(reason: EndReason) -> CallEvent {
        CallEvent::CallEnded {
            reason,
            detail: None,
        }
    }

    #[test]
    fn test_transition_table() {
        use CallStatus::*;

        let cases = [
            (CallEvent::TelephonyAccepted { leg_id: None }, Pending, Initiating),
            (CallEvent::CallRinging, Initiating, Ringing),
            (CallEvent::CallAnswered, Initiating, InProgress),
            (CallEvent::CallAnswered, Ringing, InProgress),
            (CallEvent::VoiceSessionEnded { reason: None }, Pending, Failed),
            (CallEvent::VoiceSessionEnded { reason: None }, Ringing, Failed),
            (ended(EndReason::Normal), InProgress, Completed),
            (ended(EndReason::NoAnswer), Initiating, NoAnswer),
            (ended(EndReason::NoAnswer), Ringing, NoAnswer),
            (ended(EndReason::Busy), Ringing, Busy),
            (ended(EndReason::Cancelled), Pending, Cancelled),
            (ended(EndReason::Cancelled), Ringing, Cancelled),
            (ended(EndReason::Error), Pending, Failed),
            (ended(EndReason::Error), InProgress, Failed),
        ];

        for (event, from, to) in cases {
            assert_eq!(
                CallStateMachine::transition_for(from, &event).unwrap(),
                Transition::To(to),
                "{} from {}",
                event,
                from
            );
        }
    }

    #[test]
    fn test_busy_after_answer_is_invalid() {
        let err = CallStateMachine::transition_for(CallStatus::InProgress, &ended(EndReason::Busy))
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::InvalidTransition { .. }));
        assert!(
            CallStateMachine::transition_for(CallStatus::InProgress, &ended(EndReason::NoAnswer))
                .is_err()
        );
    }

    #[test]
    fn test_normal_end_requires_answer() {
        assert!(
            CallStateMachine::transition_for(CallStatus::Ringing, &ended(EndReason::Normal))
                .is_err()
        );
    }

    #[test]
    fn test_session_end_after_answer_is_recorded_only() {
        assert_eq!(
            CallStateMachine::transition_for(
                CallStatus::InProgress,
                &CallEvent::VoiceSessionEnded { reason: None }
            )
            .unwrap(),
            Transition::RecordSessionEnded
        );
    }

    #[test]
    fn test_terminal_states_have_no_exits() {
        for status in CallStatus::ALL.into_iter().filter(|s| s.is_terminal()) {
            for to in CallStatus::ALL {
                assert!(!CallStateMachine::can_transition(&status, &to));
            }
        }
    }

    #[test]
    fn test_transitions_are_monotone() {
        for from in CallStatus::ALL {
            for to in CallStatus::ALL {
                if CallStateMachine::can_transition(&from, &to) {
                    assert!(to.rank() > from.rank(), "{} -> {}", from, to);
                }
            }
        }
    }
}
