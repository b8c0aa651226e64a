use courier_net::CallAction;
use courier_shared::protocol::{CallSignalPayload, Frame, SignalType};
use courier_shared::types::{CallMedia, ChatId, UserId};
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallState {
    Idle,
    OfferSent,
    OfferReceived,
    Connected,
    Closed,
}

/// Signaling half of one voice/video call. Media negotiation itself belongs
/// to the caller; this only tracks the offer/answer exchange and produces the
/// `call_signal` frames.
#[derive(Debug, Clone)]
pub struct CallSession {
    pub call_id: Uuid,
    pub chat_id: ChatId,
    pub local_user: UserId,
    pub remote_user: UserId,
    pub media: CallMedia,
    pub state: CallState,
    pub local_sdp: Option<String>,
    pub remote_sdp: Option<String>,
    pub ice_candidates: Vec<String>,
}

impl CallSession {
    /// A call we place.
    pub fn outgoing(chat_id: ChatId, local_user: UserId, remote_user: UserId, media: CallMedia) -> Self {
        Self::with_id(Uuid::new_v4(), chat_id, local_user, remote_user, media)
    }

    /// A call announced by `signal`.
    pub fn incoming(signal: &CallSignalPayload) -> Self {
        Self::with_id(
            signal.call_id,
            signal.chat_id,
            signal.target.clone(),
            signal.sender.clone(),
            signal.media,
        )
    }

    fn with_id(
        call_id: Uuid,
        chat_id: ChatId,
        local_user: UserId,
        remote_user: UserId,
        media: CallMedia,
    ) -> Self {
        Self {
            call_id,
            chat_id,
            local_user,
            remote_user,
            media,
            state: CallState::Idle,
            local_sdp: None,
            remote_sdp: None,
            ice_candidates: Vec::new(),
        }
    }

    pub fn is_active(&self) -> bool {
        self.state != CallState::Closed
    }

    pub fn create_offer(&mut self, sdp: String) -> Frame {
        self.local_sdp = Some(sdp.clone());
        self.state = CallState::OfferSent;
        debug!(call = %self.call_id, remote = %self.remote_user.short(), "Creating SDP offer");
        self.frame(SignalType::Offer(sdp))
    }

    pub fn create_answer(&mut self, sdp: String) -> Frame {
        self.local_sdp = Some(sdp.clone());
        self.state = CallState::Connected;
        debug!(call = %self.call_id, remote = %self.remote_user.short(), "Creating SDP answer");
        self.frame(SignalType::Answer(sdp))
    }

    pub fn create_ice_candidate(&mut self, candidate: String) -> Frame {
        self.ice_candidates.push(candidate.clone());
        self.frame(SignalType::IceCandidate(candidate))
    }

    pub fn hangup(&mut self) -> Frame {
        self.state = CallState::Closed;
        debug!(call = %self.call_id, "Hanging up");
        self.frame(SignalType::Hangup)
    }

    /// Apply a signal from the remote side and say what the media layer has
    /// to do next. Signals that do not fit the current state are dropped and
    /// leave the session untouched.
    pub fn handle_signal(&mut self, signal: &CallSignalPayload) -> Option<CallAction> {
        let expected = match &signal.signal {
            SignalType::Offer(_) => self.state == CallState::Idle,
            SignalType::Answer(_) => self.state == CallState::OfferSent,
            SignalType::IceCandidate(_) => matches!(
                self.state,
                CallState::OfferSent | CallState::OfferReceived | CallState::Connected
            ),
            SignalType::Hangup => self.state != CallState::Closed,
        };
        if !expected {
            debug!(
                call = %self.call_id,
                state = ?self.state,
                signal = signal.signal.name(),
                "Ignoring out-of-order call signal"
            );
            return None;
        }

        let action = match &signal.signal {
            SignalType::Offer(sdp) => {
                self.remote_sdp = Some(sdp.clone());
                self.state = CallState::OfferReceived;
                debug!(call = %self.call_id, from = %signal.sender.short(), "Received SDP offer");
                CallAction::CreateAnswer
            }
            SignalType::Answer(sdp) => {
                self.remote_sdp = Some(sdp.clone());
                self.state = CallState::Connected;
                debug!(call = %self.call_id, from = %signal.sender.short(), "Received SDP answer");
                CallAction::SetRemoteDescription(sdp.clone())
            }
            SignalType::IceCandidate(candidate) => {
                debug!(call = %self.call_id, from = %signal.sender.short(), "Received ICE candidate");
                CallAction::AddIceCandidate(candidate.clone())
            }
            SignalType::Hangup => {
                self.state = CallState::Closed;
                debug!(call = %self.call_id, from = %signal.sender.short(), "Received hangup");
                CallAction::Close
            }
        };
        Some(action)
    }

    fn frame(&self, signal: SignalType) -> Frame {
        Frame::CallSignal(CallSignalPayload {
            call_id: self.call_id,
            chat_id: self.chat_id,
            sender: self.local_user.clone(),
            target: self.remote_user.clone(),
            media: self.media,
            signal,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signal_of(frame: Frame) -> CallSignalPayload {
        match frame {
            Frame::CallSignal(p) => p,
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[test]
    fn test_offer_answer_exchange() {
        let chat = ChatId::new();
        let mut caller =
            CallSession::outgoing(chat, UserId::new("alice"), UserId::new("bob"), CallMedia::Video);
        let offer = signal_of(caller.create_offer("offer-sdp".into()));
        assert_eq!(caller.state, CallState::OfferSent);
        assert_eq!(offer.target, UserId::new("bob"));

        let mut callee = CallSession::incoming(&offer);
        assert_eq!(callee.local_user, UserId::new("bob"));
        assert_eq!(callee.handle_signal(&offer), Some(CallAction::CreateAnswer));
        assert_eq!(callee.state, CallState::OfferReceived);

        let answer = signal_of(callee.create_answer("answer-sdp".into()));
        assert_eq!(answer.call_id, offer.call_id);
        assert_eq!(
            caller.handle_signal(&answer),
            Some(CallAction::SetRemoteDescription("answer-sdp".into()))
        );
        assert_eq!(caller.state, CallState::Connected);
        assert_eq!(callee.state, CallState::Connected);
    }

    #[test]
    fn test_hangup_closes_both_sides() {
        let mut caller = CallSession::outgoing(
            ChatId::new(),
            UserId::new("alice"),
            UserId::new("bob"),
            CallMedia::Voice,
        );
        let offer = signal_of(caller.create_offer("sdp".into()));
        let mut callee = CallSession::incoming(&offer);

        let hangup = signal_of(callee.hangup());
        assert!(!callee.is_active());
        assert_eq!(caller.handle_signal(&hangup), Some(CallAction::Close));
        assert!(!caller.is_active());
    }

    #[test]
    fn test_ice_candidates_are_relayed() {
        let mut caller = CallSession::outgoing(
            ChatId::new(),
            UserId::new("alice"),
            UserId::new("bob"),
            CallMedia::Voice,
        );
        let offer = signal_of(caller.create_offer("sdp".into()));
        let candidate = signal_of(caller.create_ice_candidate("cand-1".into()));
        assert_eq!(caller.ice_candidates, vec!["cand-1".to_string()]);

        let mut callee = CallSession::incoming(&offer);
        callee.handle_signal(&offer);
        assert_eq!(
            callee.handle_signal(&candidate),
            Some(CallAction::AddIceCandidate("cand-1".into()))
        );
    }

    #[test]
    fn test_out_of_order_signals_are_ignored() {
        let mut caller = CallSession::outgoing(
            ChatId::new(),
            UserId::new("alice"),
            UserId::new("bob"),
            CallMedia::Voice,
        );
        let offer = signal_of(caller.create_offer("offer-sdp".into()));
        let mut callee = CallSession::incoming(&offer);

        // An answer or candidate before any offer has been seen.
        let early = signal_of(callee.create_ice_candidate("cand-0".into()));
        let mut stray = signal_of(callee.create_answer("answer-sdp".into()));
        let mut fresh = CallSession::incoming(&offer);
        assert_eq!(fresh.handle_signal(&stray), None);
        assert_eq!(fresh.handle_signal(&early), None);
        assert_eq!(fresh.state, CallState::Idle);
        assert_eq!(fresh.remote_sdp, None);

        // A repeated offer once the exchange is under way.
        assert_eq!(fresh.handle_signal(&offer), Some(CallAction::CreateAnswer));
        assert_eq!(fresh.handle_signal(&offer), None);
        assert_eq!(fresh.state, CallState::OfferReceived);

        // Nothing is accepted after hangup.
        assert_eq!(
            caller.handle_signal(&stray),
            Some(CallAction::SetRemoteDescription("answer-sdp".into()))
        );
        stray.signal = SignalType::Hangup;
        assert_eq!(caller.handle_signal(&stray), Some(CallAction::Close));
        assert_eq!(caller.handle_signal(&stray), None);
        assert_eq!(caller.handle_signal(&offer), None);
        assert_eq!(caller.state, CallState::Closed);
    }
}
