//! Conversions between [`NodeState`] and the generic [`Value`] record.
//!
//! The mirror and dispatcher operate on `Value` trees; the wire speaks
//! `NodeState`. `node_state_to_value` always emits a complete record
//! (missing submessages materialize as defaults) so it doubles as the
//! template source for mirror construction. `node_state_from_value` is
//! lenient the other way: absent or mistyped leaves fall back to their
//! default, matching how the original host treated partial records.

use super::*;
use crate::error::{NodeLinkError, NodeLinkResult};
use crate::value::Value;
use std::collections::BTreeMap;

type ValueMap = BTreeMap<String, Value>;

/// Render a state record as a nested `Value` map with every leaf present.
pub fn node_state_to_value(state: &NodeState) -> Value {
    let supervisor = state.supervisor.clone().unwrap_or_default();
    let multicard = state.multicard.clone().unwrap_or_default();
    let pm_onboard = state.pm_onboard.clone().unwrap_or_default();
    let pm_motherboard = state.pm_motherboard.clone().unwrap_or_default();
    let offset_ctrl = state.offset_ctrl.clone().unwrap_or_default();
    let hispeed = state.hispeed.clone().unwrap_or_default();
    let cob_temp = state.cob_temp.clone().unwrap_or_default();
    let cob_eeprom = state.cob_eeprom.clone().unwrap_or_default();
    let waveguide_bias = state.waveguide_bias.clone().unwrap_or_default();
    let mem_manager = state.mem_manager.clone().unwrap_or_default();
    let comms = state.comms.clone().unwrap_or_default();

    Value::map([
        ("magic_number", Value::UInt(state.magic_number)),
        ("do_system_reset", Value::Bool(state.do_system_reset)),
        ("supervisor", supervisor_to_value(&supervisor)),
        ("multicard", multicard_to_value(&multicard)),
        ("pm_onboard", power_monitor_to_value(&pm_onboard)),
        ("pm_motherboard", power_monitor_to_value(&pm_motherboard)),
        ("offset_ctrl", offset_ctrl_to_value(&offset_ctrl)),
        ("hispeed", hispeed_to_value(&hispeed)),
        ("cob_temp", cob_temp_to_value(&cob_temp)),
        ("cob_eeprom", cob_eeprom_to_value(&cob_eeprom)),
        ("waveguide_bias", wg_bias_to_value(&waveguide_bias)),
        ("mem_manager", mem_manager_to_value(&mem_manager)),
        ("comms", comms_to_value(&comms)),
    ])
}

/// Rebuild a state record from a nested `Value` map.
///
/// Errors only if the root is not a map; individual absent or mistyped
/// leaves take their default value.
pub fn node_state_from_value(value: &Value) -> NodeLinkResult<NodeState> {
    let root = value.as_map().ok_or(NodeLinkError::TypeMismatch {
        path: String::new(),
    })?;

    Ok(NodeState {
        magic_number: uint_at(root, "magic_number"),
        do_system_reset: bool_at(root, "do_system_reset"),
        supervisor: Some(supervisor_from(map_at(root, "supervisor"))),
        multicard: Some(multicard_from(map_at(root, "multicard"))),
        pm_onboard: Some(power_monitor_from(map_at(root, "pm_onboard"))),
        pm_motherboard: Some(power_monitor_from(map_at(root, "pm_motherboard"))),
        offset_ctrl: Some(offset_ctrl_from(map_at(root, "offset_ctrl"))),
        hispeed: Some(hispeed_from(map_at(root, "hispeed"))),
        cob_temp: Some(cob_temp_from(map_at(root, "cob_temp"))),
        cob_eeprom: Some(cob_eeprom_from(map_at(root, "cob_eeprom"))),
        waveguide_bias: Some(wg_bias_from(map_at(root, "waveguide_bias"))),
        mem_manager: Some(mem_manager_from(map_at(root, "mem_manager"))),
        comms: Some(comms_from(map_at(root, "comms"))),
    })
}

// ---- NodeState -> Value ----

fn supervisor_to_value(s: &Supervisor) -> Value {
    let status = s.status.clone().unwrap_or_default();
    Value::map([(
        "status",
        Value::map([
            ("app_state", Value::UInt(status.app_state)),
            ("uptime_s", Value::UInt(status.uptime_s)),
        ]),
    )])
}

fn multicard_to_value(m: &Multicard) -> Value {
    let status = m.status.clone().unwrap_or_default();
    let command = m.command.clone().unwrap_or_default();
    Value::map([
        (
            "status",
            Value::map([("pd_input_aux_npic", Value::Bool(status.pd_input_aux_npic))]),
        ),
        (
            "command",
            Value::map([(
                "sel_pd_input_aux_npic",
                Value::Bool(command.sel_pd_input_aux_npic),
            )]),
        ),
    ])
}

fn power_monitor_to_value(pm: &PowerMonitor) -> Value {
    let status = pm.status.clone().unwrap_or_default();
    let command = pm.command.clone().unwrap_or_default();
    Value::map([
        (
            "status",
            Value::map([
                ("bus_voltage_mv", Value::UInt(status.bus_voltage_mv)),
                ("bus_current_ma", Value::UInt(status.bus_current_ma)),
                ("regulator_enabled", Value::Bool(status.regulator_enabled)),
            ]),
        ),
        (
            "command",
            Value::map([("regulator_enable", Value::Bool(command.regulator_enable))]),
        ),
    ])
}

fn offset_ctrl_to_value(oc: &OffsetCtrl) -> Value {
    let status = oc.status.clone().unwrap_or_default();
    let command = oc.command.clone().unwrap_or_default();
    Value::map([
        (
            "status",
            Value::map([("offset_readback", uint_seq(&status.offset_readback))]),
        ),
        (
            "command",
            Value::map([
                ("do_readback", Value::Bool(command.do_readback)),
                ("offset_set", uint_seq(&command.offset_set)),
            ]),
        ),
    ])
}

fn hispeed_to_value(hs: &Hispeed) -> Value {
    let status = hs.status.clone().unwrap_or_default();
    let command = hs.command.clone().unwrap_or_default();
    Value::map([
        (
            "status",
            Value::map([
                ("armed", Value::Bool(status.armed)),
                ("tia_adc_readback", uint_seq(&status.tia_adc_readback)),
            ]),
        ),
        (
            "command",
            Value::map([
                ("arm_request", Value::Bool(command.arm_request)),
                ("load_test_sequence", Value::Bool(command.load_test_sequence)),
                ("soa_enable", bool_seq(&command.soa_enable)),
                ("tia_enable", bool_seq(&command.tia_enable)),
                ("soa_dac_drive", uint_seq(&command.soa_dac_drive)),
            ]),
        ),
    ])
}

fn cob_temp_to_value(ct: &CobTemp) -> Value {
    let status = ct.status.clone().unwrap_or_default();
    Value::map([(
        "status",
        Value::map([("temperature_mc", Value::UInt(status.temperature_mc))]),
    )])
}

fn cob_eeprom_to_value(ce: &CobEeprom) -> Value {
    let status = ce.status.clone().unwrap_or_default();
    let command = ce.command.clone().unwrap_or_default();
    Value::map([
        ("status", Value::map([("desc", Value::Str(status.desc))])),
        (
            "command",
            Value::map([
                ("do_write_desc", Value::Bool(command.do_write_desc)),
                ("desc_set", Value::Str(command.desc_set)),
                ("write_key", Value::UInt(command.write_key)),
            ]),
        ),
    ])
}

fn setpoints_to_value(sp: &WgBiasSetpoints) -> Value {
    Value::map([
        ("stub_setpoint", uint_seq(&sp.stub_setpoint)),
        ("mid_setpoint", uint_seq(&sp.mid_setpoint)),
        ("bulk_setpoint", uint_seq(&sp.bulk_setpoint)),
    ])
}

fn wg_bias_to_value(wg: &WgBias) -> Value {
    let status = wg.status.clone().unwrap_or_default();
    let command = wg.command.clone().unwrap_or_default();
    Value::map([
        (
            "status",
            Value::map([
                ("regulator_enabled", Value::Bool(status.regulator_enabled)),
                (
                    "setpoints_readback",
                    setpoints_to_value(&status.setpoints_readback.unwrap_or_default()),
                ),
            ]),
        ),
        (
            "command",
            Value::map([
                (
                    "setpoints",
                    setpoints_to_value(&command.setpoints.unwrap_or_default()),
                ),
                ("regulator_enable", Value::Bool(command.regulator_enable)),
                ("do_readback", Value::Bool(command.do_readback)),
            ]),
        ),
    ])
}

fn mem_manager_to_value(mm: &MemManager) -> Value {
    let status = mm.status.clone().unwrap_or_default();
    let command = mm.command.clone().unwrap_or_default();
    Value::map([
        (
            "status",
            Value::map([
                ("io_size_ok", Value::Bool(status.io_size_ok)),
                ("capacity_bytes", Value::UInt(status.capacity_bytes)),
            ]),
        ),
        (
            "command",
            Value::map([
                ("check_io_size", Value::Bool(command.check_io_size)),
                ("load_test_pattern", Value::UInt(command.load_test_pattern)),
            ]),
        ),
    ])
}

fn comms_to_value(c: &Comms) -> Value {
    let status = c.status.clone().unwrap_or_default();
    let command = c.command.clone().unwrap_or_default();
    Value::map([
        (
            "status",
            Value::map([("connection_allowed", Value::Bool(status.connection_allowed))]),
        ),
        (
            "command",
            Value::map([("allow_connection", Value::Bool(command.allow_connection))]),
        ),
    ])
}

// ---- Value -> NodeState ----

fn supervisor_from(m: Option<&ValueMap>) -> Supervisor {
    let status = submap(m, "status");
    Supervisor {
        status: Some(SupervisorStatus {
            app_state: uint_in(status, "app_state"),
            uptime_s: uint_in(status, "uptime_s"),
        }),
    }
}

fn multicard_from(m: Option<&ValueMap>) -> Multicard {
    let status = submap(m, "status");
    let command = submap(m, "command");
    Multicard {
        status: Some(MulticardStatus {
            pd_input_aux_npic: bool_in(status, "pd_input_aux_npic"),
        }),
        command: Some(MulticardCommand {
            sel_pd_input_aux_npic: bool_in(command, "sel_pd_input_aux_npic"),
        }),
    }
}

fn power_monitor_from(m: Option<&ValueMap>) -> PowerMonitor {
    let status = submap(m, "status");
    let command = submap(m, "command");
    PowerMonitor {
        status: Some(PowerMonitorStatus {
            bus_voltage_mv: uint_in(status, "bus_voltage_mv"),
            bus_current_ma: uint_in(status, "bus_current_ma"),
            regulator_enabled: bool_in(status, "regulator_enabled"),
        }),
        command: Some(PowerMonitorCommand {
            regulator_enable: bool_in(command, "regulator_enable"),
        }),
    }
}

fn offset_ctrl_from(m: Option<&ValueMap>) -> OffsetCtrl {
    let status = submap(m, "status");
    let command = submap(m, "command");
    OffsetCtrl {
        status: Some(OffsetCtrlStatus {
            offset_readback: uints_in(status, "offset_readback"),
        }),
        command: Some(OffsetCtrlCommand {
            do_readback: bool_in(command, "do_readback"),
            offset_set: uints_in(command, "offset_set"),
        }),
    }
}

fn hispeed_from(m: Option<&ValueMap>) -> Hispeed {
    let status = submap(m, "status");
    let command = submap(m, "command");
    Hispeed {
        status: Some(HispeedStatus {
            armed: bool_in(status, "armed"),
            tia_adc_readback: uints_in(status, "tia_adc_readback"),
        }),
        command: Some(HispeedCommand {
            arm_request: bool_in(command, "arm_request"),
            load_test_sequence: bool_in(command, "load_test_sequence"),
            soa_enable: bools_in(command, "soa_enable"),
            tia_enable: bools_in(command, "tia_enable"),
            soa_dac_drive: uints_in(command, "soa_dac_drive"),
        }),
    }
}

fn cob_temp_from(m: Option<&ValueMap>) -> CobTemp {
    let status = submap(m, "status");
    CobTemp {
        status: Some(CobTempStatus {
            temperature_mc: uint_in(status, "temperature_mc"),
        }),
    }
}

fn cob_eeprom_from(m: Option<&ValueMap>) -> CobEeprom {
    let status = submap(m, "status");
    let command = submap(m, "command");
    CobEeprom {
        status: Some(CobEepromStatus {
            desc: str_in(status, "desc"),
        }),
        command: Some(CobEepromCommand {
            do_write_desc: bool_in(command, "do_write_desc"),
            desc_set: str_in(command, "desc_set"),
            write_key: uint_in(command, "write_key"),
        }),
    }
}

fn setpoints_from(m: Option<&ValueMap>) -> WgBiasSetpoints {
    WgBiasSetpoints {
        stub_setpoint: uints_in(m, "stub_setpoint"),
        mid_setpoint: uints_in(m, "mid_setpoint"),
        bulk_setpoint: uints_in(m, "bulk_setpoint"),
    }
}

fn wg_bias_from(m: Option<&ValueMap>) -> WgBias {
    let status = submap(m, "status");
    let command = submap(m, "command");
    WgBias {
        status: Some(WgBiasStatus {
            regulator_enabled: bool_in(status, "regulator_enabled"),
            setpoints_readback: Some(setpoints_from(submap(status, "setpoints_readback"))),
        }),
        command: Some(WgBiasCommand {
            setpoints: Some(setpoints_from(submap(command, "setpoints"))),
            regulator_enable: bool_in(command, "regulator_enable"),
            do_readback: bool_in(command, "do_readback"),
        }),
    }
}

fn mem_manager_from(m: Option<&ValueMap>) -> MemManager {
    let status = submap(m, "status");
    let command = submap(m, "command");
    MemManager {
        status: Some(MemManagerStatus {
            io_size_ok: bool_in(status, "io_size_ok"),
            capacity_bytes: uint_in(status, "capacity_bytes"),
        }),
        command: Some(MemManagerCommand {
            check_io_size: bool_in(command, "check_io_size"),
            load_test_pattern: uint_in(command, "load_test_pattern"),
        }),
    }
}

fn comms_from(m: Option<&ValueMap>) -> Comms {
    let status = submap(m, "status");
    let command = submap(m, "command");
    Comms {
        status: Some(CommsStatus {
            connection_allowed: bool_in(status, "connection_allowed"),
        }),
        command: Some(CommsCommand {
            allow_connection: bool_in(command, "allow_connection"),
        }),
    }
}

// ---- leaf extraction helpers ----

fn uint_seq(values: &[u32]) -> Value {
    Value::Seq(values.iter().map(|v| Value::UInt(*v)).collect())
}

fn bool_seq(values: &[bool]) -> Value {
    Value::Seq(values.iter().map(|v| Value::Bool(*v)).collect())
}

fn map_at<'a>(root: &'a ValueMap, key: &str) -> Option<&'a ValueMap> {
    root.get(key).and_then(Value::as_map)
}

fn submap<'a>(m: Option<&'a ValueMap>, key: &str) -> Option<&'a ValueMap> {
    m.and_then(|m| map_at(m, key))
}

fn bool_in(m: Option<&ValueMap>, key: &str) -> bool {
    m.and_then(|m| m.get(key)).and_then(Value::as_bool).unwrap_or(false)
}

fn uint_in(m: Option<&ValueMap>, key: &str) -> u32 {
    m.and_then(|m| m.get(key)).and_then(Value::as_uint).unwrap_or(0)
}

fn str_in(m: Option<&ValueMap>, key: &str) -> String {
    m.and_then(|m| m.get(key))
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_owned()
}

fn uints_in(m: Option<&ValueMap>, key: &str) -> Vec<u32> {
    m.and_then(|m| m.get(key))
        .and_then(Value::as_seq)
        .map(|seq| seq.iter().filter_map(Value::as_uint).collect())
        .unwrap_or_default()
}

fn bools_in(m: Option<&ValueMap>, key: &str) -> Vec<bool> {
    m.and_then(|m| m.get(key))
        .and_then(Value::as_seq)
        .map(|seq| seq.iter().filter_map(Value::as_bool).collect())
        .unwrap_or_default()
}

fn uint_at(root: &ValueMap, key: &str) -> u32 {
    root.get(key).and_then(Value::as_uint).unwrap_or(0)
}

fn bool_at(root: &ValueMap, key: &str) -> bool {
    root.get(key).and_then(Value::as_bool).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::{flatten, match_type, Path};

    #[test]
    fn default_record_round_trips() {
        let state = defaults::default_all();
        let value = node_state_to_value(&state);
        let rebuilt = node_state_from_value(&value).unwrap();
        assert_eq!(rebuilt, state);
    }

    #[test]
    fn edited_record_round_trips() {
        let mut state = defaults::default_all();
        state.do_system_reset = true;
        let hispeed = state.hispeed.as_mut().unwrap().command.as_mut().unwrap();
        hispeed.soa_enable = vec![true, false, true, false];
        hispeed.soa_dac_drive = vec![100, 200, 300, 400];
        state.cob_eeprom.as_mut().unwrap().command.as_mut().unwrap().desc_set =
            "rev B".to_owned();

        let rebuilt = node_state_from_value(&node_state_to_value(&state)).unwrap();
        assert_eq!(rebuilt, state);
    }

    #[test]
    fn template_contains_expected_leaf_paths() {
        let flat = flatten(&node_state_to_value(&defaults::default_all()));
        for dotted in [
            "magic_number",
            "hispeed.command.soa_enable",
            "waveguide_bias.command.setpoints.stub_setpoint",
            "pm_onboard.status.bus_voltage_mv",
            "comms.command.allow_connection",
        ] {
            assert!(
                flat.contains_key(&Path::from_dotted(dotted)),
                "missing leaf {dotted}"
            );
        }
    }

    #[test]
    fn rendered_records_share_one_shape() {
        let a = node_state_to_value(&defaults::empty_command());
        let b = node_state_to_value(&defaults::default_all());
        assert!(match_type(&a, &b));
    }

    #[test]
    fn from_value_rejects_non_map_root() {
        assert!(node_state_from_value(&Value::Bool(true)).is_err());
    }
}
