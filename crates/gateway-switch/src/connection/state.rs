//! Connection state machine (spec §4.2).
//!
//! Grounded directly in `spark_switch::core::session::CallState`: the same
//! shape (ordered variants, a `matches!` transition table, `is_terminal`),
//! with spec.md's `NEW -> HANDSHAKING -> AUTHENTICATING -> REGISTERING ->
//! ACTIVE -> CLOSING -> CLOSED` plus a `REJECTED` branch substituted for the
//! teacher's `Initializing -> Early -> Active -> Terminated`.

/// A Connection's lifecycle phase.
///
/// # Design summary
/// - **What**: transitions are only ever legal in the direction spec.md's
///   diagram draws; [`ConnectionState::can_transition_to`] is the single
///   place that encodes the diagram, so `Connection::transition` never has
///   to re-derive it.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[non_exhaustive]
pub enum ConnectionState {
    /// Socket accepted, upgrade not yet processed.
    New,
    /// Upgrade request accepted; waiting on bearer credential extraction.
    Handshaking,
    /// Calling the auth service to resolve `(user_id, device_id)`.
    Authenticating,
    /// Calling the session directory to register this device.
    Registering,
    /// Fully established; dispatching inbound frames and serving pushes.
    Active,
    /// Tearing down: writer stopping, directory unregister in flight.
    Closing,
    /// Terminal: all resources released.
    Closed,
    /// Terminal: handshake or auth was rejected before reaching ACTIVE.
    Rejected,
}

impl ConnectionState {
    /// Whether `self -> target` is a legal transition per spec.md §4.2's diagram.
    pub fn can_transition_to(self, target: ConnectionState) -> bool {
        use ConnectionState::*;
        matches!(
            (self, target),
            (New, New)
                | (New, Handshaking)
                | (Handshaking, Handshaking)
                | (Handshaking, Authenticating)
                | (Handshaking, Rejected)
                | (Authenticating, Authenticating)
                | (Authenticating, Registering)
                | (Authenticating, Rejected)
                | (Registering, Registering)
                | (Registering, Active)
                | (Registering, Rejected)
                | (Active, Active)
                | (Active, Closing)
                | (Closing, Closing)
                | (Closing, Closed)
                | (Closed, Closed)
                | (Rejected, Rejected)
        )
    }

    /// Whether this state accepts no further transitions other than itself.
    pub fn is_terminal(self) -> bool {
        matches!(self, ConnectionState::Closed | ConnectionState::Rejected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use ConnectionState::*;

    #[rstest]
    // happy path
    #[case(New, Handshaking, true)]
    #[case(Handshaking, Authenticating, true)]
    #[case(Authenticating, Registering, true)]
    #[case(Registering, Active, true)]
    #[case(Active, Closing, true)]
    #[case(Closing, Closed, true)]
    // rejection reachable from every pre-ACTIVE phase
    #[case(Handshaking, Rejected, true)]
    #[case(Authenticating, Rejected, true)]
    #[case(Registering, Rejected, true)]
    // skipping phases is illegal
    #[case(New, Active, false)]
    #[case(Handshaking, Registering, false)]
    #[case(Active, Registering, false)]
    // terminal states accept nothing but themselves
    #[case(Closing, Active, false)]
    #[case(Closed, Active, false)]
    #[case(Rejected, Active, false)]
    fn transition_table_matches_spec_diagram(
        #[case] from: ConnectionState,
        #[case] to: ConnectionState,
        #[case] expected: bool,
    ) {
        assert_eq!(from.can_transition_to(to), expected);
    }

    #[test]
    fn terminal_states_report_is_terminal() {
        assert!(Closed.is_terminal());
        assert!(Rejected.is_terminal());
        assert!(!Active.is_terminal());
    }
}
