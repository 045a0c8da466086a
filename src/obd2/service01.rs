//! OBD2 service 01 (Show current data)

use log::warn;
use strum_macros::{Display, EnumIter};

use super::{ObdMode, ObdSession, pids};
use crate::{ObdError, ObdResult};

/// Fields of a [VehicleData] snapshot
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, EnumIter, Display)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum VehicleField {
    /// [ObdSession::get_engine_rpm]
    EngineRpm,
    /// [ObdSession::get_vehicle_speed]
    VehicleSpeed,
    /// [ObdSession::get_coolant_temp]
    CoolantTemp,
    /// [ObdSession::get_intake_temp]
    IntakeTemp,
    /// [ObdSession::get_engine_load]
    EngineLoad,
    /// [ObdSession::get_throttle_position]
    ThrottlePosition,
    /// [ObdSession::get_fuel_level]
    FuelLevel,
    /// [ObdSession::get_battery_voltage]
    BatteryVoltage,
    /// [ObdSession::get_maf_rate]
    MafRate,
}

/// Snapshot of the common live engine values.
///
/// A field is `None` when its request failed, the reason is kept in `failures`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VehicleData {
    /// Engine speed (rpm)
    pub engine_rpm: Option<f32>,
    /// Vehicle speed (km/h)
    pub vehicle_speed: Option<u8>,
    /// Engine coolant temperature (°C)
    pub coolant_temp: Option<i16>,
    /// Intake air temperature (°C)
    pub intake_temp: Option<i16>,
    /// Calculated engine load (%)
    pub engine_load: Option<f32>,
    /// Throttle position (%)
    pub throttle_position: Option<f32>,
    /// Fuel tank level (%)
    pub fuel_level: Option<f32>,
    /// Control module voltage (V)
    pub battery_voltage: Option<f32>,
    /// Mass air flow rate (g/s)
    pub maf_rate: Option<f32>,
    /// Fields that could not be read, and why
    pub failures: Vec<(VehicleField, ObdError)>,
}

impl VehicleData {
    /// True if every field was read
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Stores a decoder result into its slot, or records the failure
fn collect<T>(
    slot: &mut Option<T>,
    failures: &mut Vec<(VehicleField, ObdError)>,
    field: VehicleField,
    res: ObdResult<T>,
) {
    match res {
        Ok(v) => *slot = Some(v),
        Err(e) => {
            warn!("Reading {field} failed: {e}");
            failures.push((field, e))
        }
    }
}

fn word(a: u8, b: u8) -> u16 {
    u16::from_be_bytes([a, b])
}

impl ObdSession {
    /// Requests a mode 01 PID whose response must carry exactly `N` data bytes
    fn current_data<const N: usize>(&mut self, pid: u8) -> ObdResult<[u8; N]> {
        let resp = self.request(ObdMode::CurrentData as u8, Some(pid))?;
        resp.data().try_into().map_err(|_| {
            warn!("PID {pid:02X} returned {} data bytes, expected {N}", resp.data().len());
            ObdError::InvalidData
        })
    }

    /// Engine speed in rpm. `(256A + B) / 4`
    pub fn get_engine_rpm(&mut self) -> ObdResult<f32> {
        let [a, b] = self.current_data::<2>(pids::ENGINE_RPM)?;
        Ok(word(a, b) as f32 / 4.0)
    }

    /// Vehicle speed in km/h
    pub fn get_vehicle_speed(&mut self) -> ObdResult<u8> {
        let [a] = self.current_data::<1>(pids::VEHICLE_SPEED)?;
        Ok(a)
    }

    /// Engine coolant temperature in °C. `A - 40`
    pub fn get_coolant_temp(&mut self) -> ObdResult<i16> {
        let [a] = self.current_data::<1>(pids::COOLANT_TEMP)?;
        Ok(a as i16 - 40)
    }

    /// Intake air temperature in °C. `A - 40`
    pub fn get_intake_temp(&mut self) -> ObdResult<i16> {
        let [a] = self.current_data::<1>(pids::INTAKE_TEMP)?;
        Ok(a as i16 - 40)
    }

    /// Calculated engine load in %. `A * 100 / 255`
    pub fn get_engine_load(&mut self) -> ObdResult<f32> {
        let [a] = self.current_data::<1>(pids::ENGINE_LOAD)?;
        Ok(percent(a))
    }

    /// Throttle position in %. `A * 100 / 255`
    pub fn get_throttle_position(&mut self) -> ObdResult<f32> {
        let [a] = self.current_data::<1>(pids::THROTTLE_POS)?;
        Ok(percent(a))
    }

    /// Fuel tank level in %. `A * 100 / 255`
    pub fn get_fuel_level(&mut self) -> ObdResult<f32> {
        let [a] = self.current_data::<1>(pids::FUEL_LEVEL)?;
        Ok(percent(a))
    }

    /// Control module voltage in V. `(256A + B) / 200`
    pub fn get_battery_voltage(&mut self) -> ObdResult<f32> {
        let [a, b] = self.current_data::<2>(pids::CONTROL_MODULE_VOLTAGE)?;
        Ok(word(a, b) as f32 / 200.0)
    }

    /// Mass air flow rate in g/s. `(256A + B) / 100`
    pub fn get_maf_rate(&mut self) -> ObdResult<f32> {
        let [a, b] = self.current_data::<2>(pids::MAF_RATE)?;
        Ok(word(a, b) as f32 / 100.0)
    }

    /// Ignition timing advance in ° before TDC. `A / 2 - 64`
    pub fn get_timing_advance(&mut self) -> ObdResult<f32> {
        let [a] = self.current_data::<1>(pids::TIMING_ADVANCE)?;
        Ok(a as f32 / 2.0 - 64.0)
    }

    /// Intake manifold absolute pressure in kPa
    pub fn get_intake_manifold_pressure(&mut self) -> ObdResult<u8> {
        let [a] = self.current_data::<1>(pids::INTAKE_MAP)?;
        Ok(a)
    }

    /// Absolute barometric pressure in kPa
    pub fn get_barometric_pressure(&mut self) -> ObdResult<u8> {
        let [a] = self.current_data::<1>(pids::BAROMETRIC_PRESSURE)?;
        Ok(a)
    }

    /// Ambient air temperature in °C. `A - 40`
    pub fn get_ambient_temp(&mut self) -> ObdResult<i16> {
        let [a] = self.current_data::<1>(pids::AMBIENT_TEMP)?;
        Ok(a as i16 - 40)
    }

    /// Engine oil temperature in °C. `A - 40`
    pub fn get_oil_temp(&mut self) -> ObdResult<i16> {
        let [a] = self.current_data::<1>(pids::ENGINE_OIL_TEMP)?;
        Ok(a as i16 - 40)
    }

    /// Seconds since the engine was started
    pub fn get_run_time(&mut self) -> ObdResult<u16> {
        let [a, b] = self.current_data::<2>(pids::RUN_TIME)?;
        Ok(word(a, b))
    }

    /// Distance traveled with the MIL on, in km
    pub fn get_distance_with_mil(&mut self) -> ObdResult<u16> {
        let [a, b] = self.current_data::<2>(pids::DISTANCE_MIL)?;
        Ok(word(a, b))
    }

    /// Distance traveled since DTCs were cleared, in km
    pub fn get_distance_since_cleared(&mut self) -> ObdResult<u16> {
        let [a, b] = self.current_data::<2>(pids::DISTANCE_CODES_CLEARED)?;
        Ok(word(a, b))
    }

    /// Fuel rail gauge pressure in kPa. `10 * (256A + B)`
    pub fn get_fuel_rail_gauge_pressure(&mut self) -> ObdResult<u32> {
        let [a, b] = self.current_data::<2>(pids::FUEL_RAIL_GAUGE)?;
        Ok(word(a, b) as u32 * 10)
    }

    /// Reads every [VehicleField]. A failed field does not stop the others from being read
    pub fn get_all_vehicle_data(&mut self) -> VehicleData {
        let mut d = VehicleData::default();
        let f = &mut d.failures;
        collect(&mut d.engine_rpm, f, VehicleField::EngineRpm, self.get_engine_rpm());
        collect(&mut d.vehicle_speed, f, VehicleField::VehicleSpeed, self.get_vehicle_speed());
        collect(&mut d.coolant_temp, f, VehicleField::CoolantTemp, self.get_coolant_temp());
        collect(&mut d.intake_temp, f, VehicleField::IntakeTemp, self.get_intake_temp());
        collect(&mut d.engine_load, f, VehicleField::EngineLoad, self.get_engine_load());
        collect(
            &mut d.throttle_position,
            f,
            VehicleField::ThrottlePosition,
            self.get_throttle_position(),
        );
        collect(&mut d.fuel_level, f, VehicleField::FuelLevel, self.get_fuel_level());
        collect(
            &mut d.battery_voltage,
            f,
            VehicleField::BatteryVoltage,
            self.get_battery_voltage(),
        );
        collect(&mut d.maf_rate, f, VehicleField::MafRate, self.get_maf_rate());
        d
    }
}

fn percent(a: u8) -> f32 {
    a as f32 * 100.0 / 255.0
}
