macro_rules! opcodes {
    ($(#[$meta:meta])* $enum:ident { $($name:ident = $val:literal),* $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum $enum { $($name = $val,)* }

        impl $enum {
            #[must_use]
            pub const fn as_u8(self) -> u8 { self as u8 }

            /// Looks up a known opcode; unknown values return `None` so callers can ignore them.
            #[must_use]
            pub const fn from_u8(value: u8) -> Option<Self> {
                match value {
                    $($val => Some(Self::$name),)*
                    _ => None,
                }
            }
        }
    };
}

opcodes! {
    /// Opcodes of the primary gateway (API v10).
    GatewayOpcode {
        Dispatch = 0,
        Heartbeat = 1,
        Identify = 2,
        VoiceStateUpdate = 4,
        Reconnect = 7,
        InvalidSession = 9,
        Hello = 10,
        HeartbeatAck = 11,
    }
}

opcodes! {
    /// Opcodes of the voice gateway (version 4).
    VoiceOpcode {
        Identify = 0,
        SelectProtocol = 1,
        Ready = 2,
        Heartbeat = 3,
        SessionDescription = 4,
        Speaking = 5,
        HeartbeatAck = 6,
        Hello = 8,
    }
}
