//! Fully-populated default node-state records.
//!
//! The firmware's decoder expects every submessage present and every
//! repeated field at its hardware lane count, so defaults are materialized
//! explicitly rather than relying on proto zero-values.

use super::*;

/// Wire-format compatibility sentinel carried in every state record.
pub const MAGIC_NUMBER: u32 = 0xA5A5_A5A5;

/// Offset-control DAC lanes.
pub const OFFSET_LANES: usize = 4;
/// High-speed SOA/TIA channels.
pub const HISPEED_LANES: usize = 4;
/// Waveguide bias bank sizes.
pub const WG_STUB_LANES: usize = 10;
pub const WG_MID_LANES: usize = 4;
pub const WG_BULK_LANES: usize = 2;

/// Pre-sized setpoint banks, all zero.
pub fn default_setpoints() -> WgBiasSetpoints {
    WgBiasSetpoints {
        stub_setpoint: vec![0; WG_STUB_LANES],
        mid_setpoint: vec![0; WG_MID_LANES],
        bulk_setpoint: vec![0; WG_BULK_LANES],
    }
}

/// A state record suitable for polling: every submessage constructed, status
/// repeated fields pre-sized, no commands asserted, magic number set.
///
/// Sending this elicits the device's current state without changing it.
pub fn empty_command() -> NodeState {
    NodeState {
        magic_number: MAGIC_NUMBER,
        do_system_reset: false,
        supervisor: Some(Supervisor {
            status: Some(SupervisorStatus::default()),
        }),
        multicard: Some(Multicard {
            status: Some(MulticardStatus::default()),
            command: Some(MulticardCommand::default()),
        }),
        pm_onboard: Some(default_power_monitor()),
        pm_motherboard: Some(default_power_monitor()),
        offset_ctrl: Some(OffsetCtrl {
            status: Some(OffsetCtrlStatus {
                offset_readback: vec![0; OFFSET_LANES],
            }),
            command: Some(OffsetCtrlCommand::default()),
        }),
        hispeed: Some(Hispeed {
            status: Some(HispeedStatus {
                armed: false,
                tia_adc_readback: vec![0; HISPEED_LANES],
            }),
            command: Some(HispeedCommand::default()),
        }),
        cob_temp: Some(CobTemp {
            status: Some(CobTempStatus::default()),
        }),
        cob_eeprom: Some(CobEeprom {
            status: Some(CobEepromStatus::default()),
            command: Some(CobEepromCommand::default()),
        }),
        waveguide_bias: Some(WgBias {
            status: Some(WgBiasStatus {
                regulator_enabled: false,
                setpoints_readback: Some(default_setpoints()),
            }),
            command: Some(WgBiasCommand::default()),
        }),
        mem_manager: Some(MemManager {
            status: Some(MemManagerStatus::default()),
            command: Some(MemManagerCommand::default()),
        }),
        comms: Some(Comms {
            status: Some(CommsStatus::default()),
            command: Some(CommsCommand::default()),
        }),
    }
}

/// A state record with every command field at its safe initial value and
/// every repeated command field pre-sized. This is the reference template the
/// mirror is constructed from.
pub fn default_all() -> NodeState {
    let mut state = empty_command();

    if let Some(multicard) = state.multicard.as_mut() {
        multicard.command = Some(MulticardCommand {
            sel_pd_input_aux_npic: false,
        });
    }
    if let Some(pm) = state.pm_onboard.as_mut() {
        pm.command = Some(PowerMonitorCommand {
            regulator_enable: false,
        });
    }
    if let Some(pm) = state.pm_motherboard.as_mut() {
        pm.command = Some(PowerMonitorCommand {
            regulator_enable: false,
        });
    }
    if let Some(offset_ctrl) = state.offset_ctrl.as_mut() {
        offset_ctrl.command = Some(OffsetCtrlCommand {
            do_readback: false,
            offset_set: vec![0; OFFSET_LANES],
        });
    }
    if let Some(hispeed) = state.hispeed.as_mut() {
        hispeed.command = Some(HispeedCommand {
            arm_request: false,
            load_test_sequence: false,
            soa_enable: vec![false; HISPEED_LANES],
            tia_enable: vec![false; HISPEED_LANES],
            soa_dac_drive: vec![0; HISPEED_LANES],
        });
    }
    if let Some(eeprom) = state.cob_eeprom.as_mut() {
        eeprom.command = Some(CobEepromCommand {
            do_write_desc: false,
            desc_set: String::new(),
            write_key: 0,
        });
    }
    if let Some(wg) = state.waveguide_bias.as_mut() {
        wg.command = Some(WgBiasCommand {
            setpoints: Some(default_setpoints()),
            regulator_enable: false,
            do_readback: false,
        });
    }
    if let Some(mem) = state.mem_manager.as_mut() {
        mem.command = Some(MemManagerCommand {
            check_io_size: false,
            load_test_pattern: 0,
        });
    }
    if let Some(comms) = state.comms.as_mut() {
        comms.command = Some(CommsCommand {
            allow_connection: true,
        });
    }

    state
}

fn default_power_monitor() -> PowerMonitor {
    PowerMonitor {
        status: Some(PowerMonitorStatus::default()),
        command: Some(PowerMonitorCommand::default()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_command_presizes_status_lanes() {
        let state = empty_command();
        assert_eq!(state.magic_number, MAGIC_NUMBER);
        assert_eq!(
            state
                .offset_ctrl
                .as_ref()
                .unwrap()
                .status
                .as_ref()
                .unwrap()
                .offset_readback
                .len(),
            OFFSET_LANES
        );
        let readback = &state
            .waveguide_bias
            .as_ref()
            .unwrap()
            .status
            .as_ref()
            .unwrap()
            .setpoints_readback;
        let readback = readback.as_ref().unwrap();
        assert_eq!(readback.stub_setpoint.len(), WG_STUB_LANES);
        assert_eq!(readback.mid_setpoint.len(), WG_MID_LANES);
        assert_eq!(readback.bulk_setpoint.len(), WG_BULK_LANES);
    }

    #[test]
    fn default_all_presizes_command_lanes() {
        let state = default_all();
        let hispeed = state.hispeed.as_ref().unwrap().command.as_ref().unwrap();
        assert_eq!(hispeed.soa_enable.len(), HISPEED_LANES);
        assert_eq!(hispeed.tia_enable.len(), HISPEED_LANES);
        assert_eq!(hispeed.soa_dac_drive.len(), HISPEED_LANES);
        assert!(state
            .comms
            .as_ref()
            .unwrap()
            .command
            .as_ref()
            .unwrap()
            .allow_connection);
    }
}
