//! Drone status word
//!
//! The second header word of every navdata packet is a bitmask of independent
//! status flags. Bits 14, 18 and 20 are unused and ignored on decode.

use serde::{Deserialize, Serialize};

macro_rules! state_flags {
    ($( $bit:literal => $variant:ident, $field:ident, $doc:literal; )+) => {
        /// One named bit of the drone status word.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum StateFlag {
            $( #[doc = $doc] $variant, )+
        }

        impl StateFlag {
            /// Every flag, in ascending bit order.
            pub const ALL: &'static [StateFlag] = &[ $( StateFlag::$variant, )+ ];

            /// Bit position in the status word.
            pub const fn bit(self) -> u32 {
                match self {
                    $( StateFlag::$variant => $bit, )+
                }
            }

            /// Field name used for this flag on [`DroneState`].
            pub const fn name(self) -> &'static str {
                match self {
                    $( StateFlag::$variant => stringify!($field), )+
                }
            }
        }

        /// Status flags unpacked from the navdata state word.
        ///
        /// Each flag is a single independent bit; no combination is rejected
        /// even when it is contradictory.
        #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
        pub struct DroneState {
            $( #[doc = $doc] pub $field: bool, )+
        }

        impl DroneState {
            /// Unpack a raw status word.
            pub fn from_word(word: u32) -> Self {
                Self {
                    $( $field: (word >> $bit) & 1 != 0, )+
                }
            }

            /// Repack into a status word. Unused bits come back clear.
            pub fn to_word(&self) -> u32 {
                let mut word = 0u32;
                $( if self.$field { word |= 1 << $bit; } )+
                word
            }

            /// Read a single flag.
            pub fn get(&self, flag: StateFlag) -> bool {
                match flag {
                    $( StateFlag::$variant => self.$field, )+
                }
            }
        }
    };
}

state_flags! {
    0 => Flying, flying, "Drone is flying (clear when landed).";
    1 => VideoEnabled, video_enabled, "Video stream is enabled.";
    2 => VisionEnabled, vision_enabled, "Vision processing is enabled.";
    3 => AngularSpeedControl, angular_speed_control, "Angular speed control (clear for euler angle control).";
    4 => AltitudeControl, altitude_control, "Altitude control loop is active.";
    5 => UserStartButton, user_start_button, "User feedback start button state.";
    6 => CommandAck, command_ack, "A control command acknowledgement was received.";
    7 => FirmwareFileOk, firmware_file_ok, "Firmware file is good.";
    8 => FirmwareNewer, firmware_newer, "Firmware update is newer.";
    9 => FirmwareUpdating, firmware_updating, "Firmware update is ongoing.";
    10 => NavdataDemoOnly, navdata_demo_only, "Only demo navdata is sent.";
    11 => NavdataBootstrap, navdata_bootstrap, "No navdata options are being sent.";
    12 => MotorProblem, motor_problem, "Motor problem reported.";
    13 => ComLost, com_lost, "Communication lost.";
    15 => BatteryLow, battery_low, "Battery voltage too low.";
    16 => UserEmergencyLanding, user_emergency_landing, "User emergency landing is on.";
    17 => TimerElapsed, timer_elapsed, "Timer elapsed.";
    19 => AnglesOutOfRange, angles_out_of_range, "Angles out of range.";
    21 => UltrasoundDeaf, ultrasound_deaf, "Ultrasonic sensor is deaf.";
    22 => CutoutDetected, cutout_detected, "Cutout system detection triggered.";
    23 => PicVersionOk, pic_version_ok, "PIC version number is OK (clear for a bad version).";
    24 => AtcodecThreadOn, atcodec_thread_on, "ATCodec thread running.";
    25 => NavdataThreadOn, navdata_thread_on, "Navdata thread running.";
    26 => VideoThreadOn, video_thread_on, "Video thread running.";
    27 => AcquisitionThreadOn, acquisition_thread_on, "Acquisition thread running.";
    28 => CtrlWatchdog, ctrl_watchdog, "Control execution delayed (> 5ms).";
    29 => AdcWatchdog, adc_watchdog, "ADC (uart2 dsr) delayed (> 5ms).";
    30 => ComWatchdog, com_watchdog, "Communication watchdog tripped.";
    31 => Emergency, emergency, "Emergency landing.";
}

/// Bits of the status word that carry no flag.
pub const UNUSED_STATE_BITS: [u32; 3] = [14, 18, 20];

impl DroneState {
    /// Flags currently set, in bit order.
    pub fn active_flags(&self) -> impl Iterator<Item = StateFlag> + '_ {
        StateFlag::ALL.iter().copied().filter(move |flag| self.get(*flag))
    }
}
