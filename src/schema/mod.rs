//! Wire schema for the node link.
//!
//! Hand-written `prost` messages matching the schema the device firmware
//! compiles into its nanopb tables. Every exchange on the wire is a single
//! [`Communication`] carrying exactly one payload case: the full node state,
//! an asynchronous debug message, or a file request/response.
//!
//! Repeated fields model fixed-lane hardware (DAC/ADC channels, bias
//! setpoint banks); the lane counts live in [`defaults`] alongside the
//! fully-populated default records.

pub mod convert;
pub mod defaults;

/// Outer wrapper for any single wire payload.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Communication {
    #[prost(oneof = "communication::Payload", tags = "1, 2, 3")]
    pub payload: ::core::option::Option<communication::Payload>,
}

pub mod communication {
    /// The tagged union of everything a node can say or be told.
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Payload {
        #[prost(message, tag = "1")]
        NodeState(super::NodeState),
        #[prost(message, tag = "2")]
        DebugMessage(super::Debug),
        #[prost(message, tag = "3")]
        FileRequest(super::FileRequest),
    }

    impl Payload {
        /// Discriminator name, for routing logs.
        pub fn kind_name(&self) -> &'static str {
            match self {
                Payload::NodeState(_) => "node_state",
                Payload::DebugMessage(_) => "debug_message",
                Payload::FileRequest(_) => "file_request",
            }
        }
    }
}

impl Communication {
    pub fn node_state(state: NodeState) -> Self {
        Self {
            payload: Some(communication::Payload::NodeState(state)),
        }
    }

    pub fn debug_message(debug: Debug) -> Self {
        Self {
            payload: Some(communication::Payload::DebugMessage(debug)),
        }
    }

    pub fn file_request(request: FileRequest) -> Self {
        Self {
            payload: Some(communication::Payload::FileRequest(request)),
        }
    }
}

/// Full mirrored state of one node: a magic-number handshake leaf, a reset
/// strobe, and one submessage per hardware subsystem. Each subsystem carries
/// a `status` half (device -> host) and, where the hardware takes input, a
/// `command` half (host -> device).
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct NodeState {
    /// Wire-format compatibility sentinel; see [`defaults::MAGIC_NUMBER`].
    #[prost(uint32, tag = "1")]
    pub magic_number: u32,
    #[prost(bool, tag = "2")]
    pub do_system_reset: bool,
    #[prost(message, optional, tag = "3")]
    pub supervisor: ::core::option::Option<Supervisor>,
    #[prost(message, optional, tag = "4")]
    pub multicard: ::core::option::Option<Multicard>,
    #[prost(message, optional, tag = "5")]
    pub pm_onboard: ::core::option::Option<PowerMonitor>,
    #[prost(message, optional, tag = "6")]
    pub pm_motherboard: ::core::option::Option<PowerMonitor>,
    #[prost(message, optional, tag = "7")]
    pub offset_ctrl: ::core::option::Option<OffsetCtrl>,
    #[prost(message, optional, tag = "8")]
    pub hispeed: ::core::option::Option<Hispeed>,
    #[prost(message, optional, tag = "9")]
    pub cob_temp: ::core::option::Option<CobTemp>,
    #[prost(message, optional, tag = "10")]
    pub cob_eeprom: ::core::option::Option<CobEeprom>,
    #[prost(message, optional, tag = "11")]
    pub waveguide_bias: ::core::option::Option<WgBias>,
    #[prost(message, optional, tag = "12")]
    pub mem_manager: ::core::option::Option<MemManager>,
    #[prost(message, optional, tag = "13")]
    pub comms: ::core::option::Option<Comms>,
}

/// State supervisor: status only, no host-side commands.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Supervisor {
    #[prost(message, optional, tag = "1")]
    pub status: ::core::option::Option<SupervisorStatus>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SupervisorStatus {
    #[prost(uint32, tag = "1")]
    pub app_state: u32,
    #[prost(uint32, tag = "2")]
    pub uptime_s: u32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Multicard {
    #[prost(message, optional, tag = "1")]
    pub status: ::core::option::Option<MulticardStatus>,
    #[prost(message, optional, tag = "2")]
    pub command: ::core::option::Option<MulticardCommand>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct MulticardStatus {
    #[prost(bool, tag = "1")]
    pub pd_input_aux_npic: bool,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct MulticardCommand {
    #[prost(bool, tag = "1")]
    pub sel_pd_input_aux_npic: bool,
}

/// Power monitor, instantiated twice (onboard and motherboard rails).
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct PowerMonitor {
    #[prost(message, optional, tag = "1")]
    pub status: ::core::option::Option<PowerMonitorStatus>,
    #[prost(message, optional, tag = "2")]
    pub command: ::core::option::Option<PowerMonitorCommand>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct PowerMonitorStatus {
    #[prost(uint32, tag = "1")]
    pub bus_voltage_mv: u32,
    #[prost(uint32, tag = "2")]
    pub bus_current_ma: u32,
    #[prost(bool, tag = "3")]
    pub regulator_enabled: bool,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct PowerMonitorCommand {
    #[prost(bool, tag = "1")]
    pub regulator_enable: bool,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct OffsetCtrl {
    #[prost(message, optional, tag = "1")]
    pub status: ::core::option::Option<OffsetCtrlStatus>,
    #[prost(message, optional, tag = "2")]
    pub command: ::core::option::Option<OffsetCtrlCommand>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct OffsetCtrlStatus {
    /// One readback per offset DAC lane.
    #[prost(uint32, repeated, tag = "1")]
    pub offset_readback: ::prost::alloc::vec::Vec<u32>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct OffsetCtrlCommand {
    #[prost(bool, tag = "1")]
    pub do_readback: bool,
    #[prost(uint32, repeated, tag = "2")]
    pub offset_set: ::prost::alloc::vec::Vec<u32>,
}

/// High-speed optical front end: SOA drive, TIA capture, arm/trigger.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Hispeed {
    #[prost(message, optional, tag = "1")]
    pub status: ::core::option::Option<HispeedStatus>,
    #[prost(message, optional, tag = "2")]
    pub command: ::core::option::Option<HispeedCommand>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct HispeedStatus {
    #[prost(bool, tag = "1")]
    pub armed: bool,
    #[prost(uint32, repeated, tag = "2")]
    pub tia_adc_readback: ::prost::alloc::vec::Vec<u32>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct HispeedCommand {
    #[prost(bool, tag = "1")]
    pub arm_request: bool,
    #[prost(bool, tag = "2")]
    pub load_test_sequence: bool,
    #[prost(bool, repeated, tag = "3")]
    pub soa_enable: ::prost::alloc::vec::Vec<bool>,
    #[prost(bool, repeated, tag = "4")]
    pub tia_enable: ::prost::alloc::vec::Vec<bool>,
    #[prost(uint32, repeated, tag = "5")]
    pub soa_dac_drive: ::prost::alloc::vec::Vec<u32>,
}

/// Chip-on-board temperature sense: status only.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CobTemp {
    #[prost(message, optional, tag = "1")]
    pub status: ::core::option::Option<CobTempStatus>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CobTempStatus {
    /// Millidegrees Celsius.
    #[prost(uint32, tag = "1")]
    pub temperature_mc: u32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CobEeprom {
    #[prost(message, optional, tag = "1")]
    pub status: ::core::option::Option<CobEepromStatus>,
    #[prost(message, optional, tag = "2")]
    pub command: ::core::option::Option<CobEepromCommand>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CobEepromStatus {
    #[prost(string, tag = "1")]
    pub desc: ::prost::alloc::string::String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CobEepromCommand {
    #[prost(bool, tag = "1")]
    pub do_write_desc: bool,
    #[prost(string, tag = "2")]
    pub desc_set: ::prost::alloc::string::String,
    /// Write-protect key; the device rejects writes without the right value.
    #[prost(uint32, tag = "3")]
    pub write_key: u32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct WgBias {
    #[prost(message, optional, tag = "1")]
    pub status: ::core::option::Option<WgBiasStatus>,
    #[prost(message, optional, tag = "2")]
    pub command: ::core::option::Option<WgBiasCommand>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct WgBiasStatus {
    #[prost(bool, tag = "1")]
    pub regulator_enabled: bool,
    #[prost(message, optional, tag = "2")]
    pub setpoints_readback: ::core::option::Option<WgBiasSetpoints>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct WgBiasCommand {
    #[prost(message, optional, tag = "1")]
    pub setpoints: ::core::option::Option<WgBiasSetpoints>,
    #[prost(bool, tag = "2")]
    pub regulator_enable: bool,
    #[prost(bool, tag = "3")]
    pub do_readback: bool,
}

/// Waveguide bias setpoints, banked by electrode geometry.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct WgBiasSetpoints {
    #[prost(uint32, repeated, tag = "1")]
    pub stub_setpoint: ::prost::alloc::vec::Vec<u32>,
    #[prost(uint32, repeated, tag = "2")]
    pub mid_setpoint: ::prost::alloc::vec::Vec<u32>,
    #[prost(uint32, repeated, tag = "3")]
    pub bulk_setpoint: ::prost::alloc::vec::Vec<u32>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct MemManager {
    #[prost(message, optional, tag = "1")]
    pub status: ::core::option::Option<MemManagerStatus>,
    #[prost(message, optional, tag = "2")]
    pub command: ::core::option::Option<MemManagerCommand>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct MemManagerStatus {
    #[prost(bool, tag = "1")]
    pub io_size_ok: bool,
    #[prost(uint32, tag = "2")]
    pub capacity_bytes: u32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct MemManagerCommand {
    #[prost(bool, tag = "1")]
    pub check_io_size: bool,
    #[prost(uint32, tag = "2")]
    pub load_test_pattern: u32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Comms {
    #[prost(message, optional, tag = "1")]
    pub status: ::core::option::Option<CommsStatus>,
    #[prost(message, optional, tag = "2")]
    pub command: ::core::option::Option<CommsCommand>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CommsStatus {
    #[prost(bool, tag = "1")]
    pub connection_allowed: bool,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CommsCommand {
    #[prost(bool, tag = "1")]
    pub allow_connection: bool,
}

/// Asynchronous debug message emitted by the device at any time.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Debug {
    #[prost(enumeration = "DebugLevel", tag = "1")]
    pub level: i32,
    #[prost(string, tag = "2")]
    pub msg: ::prost::alloc::string::String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum DebugLevel {
    Info = 0,
    Warn = 1,
    Error = 2,
}

impl DebugLevel {
    /// Every level the schema defines; the debug topic set is derived from
    /// this rather than hard-coded at subscription sites.
    pub const ALL: [DebugLevel; 3] = [DebugLevel::Info, DebugLevel::Warn, DebugLevel::Error];

    /// Uppercase display name, as shown in debug terminals.
    pub fn name(&self) -> &'static str {
        match self {
            DebugLevel::Info => "INFO",
            DebugLevel::Warn => "WARN",
            DebugLevel::Error => "ERROR",
        }
    }

    /// Lowercase topic component under `<root>.debug.`.
    pub fn topic(&self) -> &'static str {
        match self {
            DebugLevel::Info => "info",
            DebugLevel::Warn => "warn",
            DebugLevel::Error => "error",
        }
    }
}

/// File request/response: either a catalog query (empty list elicits the
/// catalog) or a bounded read/write access into the on-device memory area.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct FileRequest {
    #[prost(oneof = "file_request::Payload", tags = "1, 2")]
    pub payload: ::core::option::Option<file_request::Payload>,
}

pub mod file_request {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Payload {
        #[prost(message, tag = "1")]
        List(super::FileCatalog),
        #[prost(message, tag = "2")]
        Access(super::FileAccess),
    }
}

impl FileRequest {
    /// An empty catalog query.
    pub fn list_query() -> Self {
        Self {
            payload: Some(file_request::Payload::List(FileCatalog::default())),
        }
    }

    pub fn access(access: FileAccess) -> Self {
        Self {
            payload: Some(file_request::Payload::Access(access)),
        }
    }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct FileCatalog {
    #[prost(message, repeated, tag = "1")]
    pub files: ::prost::alloc::vec::Vec<FileInfo>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct FileInfo {
    #[prost(string, tag = "1")]
    pub filename: ::prost::alloc::string::String,
    #[prost(uint32, tag = "2")]
    pub filesize: u32,
}

/// One segment of a file transfer. For reads the host supplies `data` as a
/// zero buffer whose length is the requested chunk size; for writes `data`
/// is the payload to commit at `offset`.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct FileAccess {
    #[prost(string, tag = "1")]
    pub filename: ::prost::alloc::string::String,
    #[prost(uint32, tag = "2")]
    pub offset: u32,
    #[prost(bool, tag = "3")]
    pub read_not_write: bool,
    #[prost(bytes = "vec", tag = "4")]
    pub data: ::prost::alloc::vec::Vec<u8>,
}
