//! Parameter IDs (PIDs) used with [super::ObdMode::CurrentData] and [super::ObdMode::VehicleInfo]

/// Supported PIDs [01-20]
pub const SUPPORTED_PIDS_01_20: u8 = 0x00;
/// Monitor status since DTCs cleared
pub const MONITOR_STATUS: u8 = 0x01;
/// DTC that caused the freeze frame
pub const FREEZE_DTC: u8 = 0x02;
/// Fuel system status
pub const FUEL_SYSTEM_STATUS: u8 = 0x03;
/// Calculated engine load
pub const ENGINE_LOAD: u8 = 0x04;
/// Engine coolant temperature
pub const COOLANT_TEMP: u8 = 0x05;
/// Short term fuel trim, bank 1
pub const SHORT_FUEL_TRIM_1: u8 = 0x06;
/// Long term fuel trim, bank 1
pub const LONG_FUEL_TRIM_1: u8 = 0x07;
/// Short term fuel trim, bank 2
pub const SHORT_FUEL_TRIM_2: u8 = 0x08;
/// Long term fuel trim, bank 2
pub const LONG_FUEL_TRIM_2: u8 = 0x09;
/// Fuel pressure (gauge)
pub const FUEL_PRESSURE: u8 = 0x0A;
/// Intake manifold absolute pressure
pub const INTAKE_MAP: u8 = 0x0B;
/// Engine speed
pub const ENGINE_RPM: u8 = 0x0C;
/// Vehicle speed
pub const VEHICLE_SPEED: u8 = 0x0D;
/// Timing advance before TDC
pub const TIMING_ADVANCE: u8 = 0x0E;
/// Intake air temperature
pub const INTAKE_TEMP: u8 = 0x0F;
/// Mass air flow rate
pub const MAF_RATE: u8 = 0x10;
/// Throttle position
pub const THROTTLE_POS: u8 = 0x11;
/// Oxygen sensors present
pub const O2_SENSORS_PRESENT: u8 = 0x13;
/// Oxygen sensor 1
pub const O2_SENSOR_1: u8 = 0x14;
/// OBD standard the vehicle conforms to
pub const OBD_STANDARDS: u8 = 0x1C;
/// Run time since engine start
pub const RUN_TIME: u8 = 0x1F;
/// Supported PIDs [21-40]
pub const SUPPORTED_PIDS_21_40: u8 = 0x20;
/// Distance traveled with MIL on
pub const DISTANCE_MIL: u8 = 0x21;
/// Fuel rail pressure, relative to manifold vacuum
pub const FUEL_RAIL_PRESSURE: u8 = 0x22;
/// Fuel rail gauge pressure
pub const FUEL_RAIL_GAUGE: u8 = 0x23;
/// Commanded EGR
pub const COMMANDED_EGR: u8 = 0x2C;
/// EGR error
pub const EGR_ERROR: u8 = 0x2D;
/// Fuel tank level input
pub const FUEL_LEVEL: u8 = 0x2F;
/// Distance traveled since codes cleared
pub const DISTANCE_CODES_CLEARED: u8 = 0x31;
/// Absolute barometric pressure
pub const BAROMETRIC_PRESSURE: u8 = 0x33;
/// Catalyst temperature, bank 1 sensor 1
pub const CATALYST_TEMP_B1S1: u8 = 0x3C;
/// Supported PIDs [41-60]
pub const SUPPORTED_PIDS_41_60: u8 = 0x40;
/// Control module voltage
pub const CONTROL_MODULE_VOLTAGE: u8 = 0x42;
/// Absolute load value
pub const ABSOLUTE_LOAD: u8 = 0x43;
/// Commanded air-fuel equivalence ratio
pub const COMMANDED_EQUIV_RATIO: u8 = 0x44;
/// Relative throttle position
pub const RELATIVE_THROTTLE: u8 = 0x45;
/// Ambient air temperature
pub const AMBIENT_TEMP: u8 = 0x46;
/// Engine oil temperature
pub const ENGINE_OIL_TEMP: u8 = 0x5C;
/// Fuel injection timing
pub const FUEL_INJECTION_TIMING: u8 = 0x5D;
/// Engine fuel rate
pub const ENGINE_FUEL_RATE: u8 = 0x5E;

/// Service 09: VIN message count
pub const VIN_COUNT: u8 = 0x01;
/// Service 09: Vehicle identification number
pub const VIN: u8 = 0x02;
/// Service 09: Calibration ID
pub const CALIBRATION_ID: u8 = 0x04;
/// Service 09: ECU name
pub const ECU_NAME: u8 = 0x0A;
