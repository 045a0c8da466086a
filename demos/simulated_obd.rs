//! Reads live data and DTCs from a simulated ECU
//!
//! Run with `RUST_LOG=debug cargo run --example simulated_obd` to see every frame

use can_obd2::{
    channel::TransportConfig,
    dtc::dtc_to_string,
    hardware::simulation::{SimulatedClock, SimulatedEcu},
    obd2::{ObdMode, ObdSession},
};

fn main() {
    env_logger::init();

    let clock = SimulatedClock::new();
    let mut ecu = SimulatedEcu::new(clock.clone());
    ecu.set_latency_ms(5);
    ecu.add_response(&[0x01, 0x00], &[0x41, 0x00, 0x18, 0x1B, 0x80, 0x00]);
    ecu.add_response(&[0x01, 0x0C], &[0x41, 0x0C, 0x1A, 0xF8]);
    ecu.add_response(&[0x01, 0x0D], &[0x41, 0x0D, 0x32]);
    ecu.add_response(&[0x01, 0x05], &[0x41, 0x05, 0x7B]);
    ecu.add_response(&[0x01, 0x0F], &[0x41, 0x0F, 0x46]);
    ecu.add_response(&[0x01, 0x04], &[0x41, 0x04, 0x33]);
    ecu.add_response(&[0x01, 0x11], &[0x41, 0x11, 0x26]);
    ecu.add_response(&[0x01, 0x42], &[0x41, 0x42, 0x0B, 0x54]);
    ecu.add_response(&[0x03], &[0x43, 0x02, 0x03, 0x01, 0x01, 0x71]);
    ecu.add_response(&[0x04], &[0x44]);

    let mut session = ObdSession::new(Box::new(ecu), Box::new(clock));
    if let Err(e) = session.init(&TransportConfig::default()) {
        eprintln!("Could not start the transport: {e}");
        return;
    }

    match session.supported_pids(ObdMode::CurrentData as u8) {
        Ok(pids) => println!("Supported PIDs: {pids:02X?}"),
        Err(e) => eprintln!("Supported PID query failed: {e}"),
    }

    let data = session.get_all_vehicle_data();
    println!("{data:#?}");
    for (field, err) in &data.failures {
        eprintln!("{field} unavailable: {err}");
    }

    match session.read_dtcs() {
        Ok(dtcs) => {
            for dtc in &dtcs {
                println!("Stored DTC {}", dtc_to_string(dtc));
            }
            if let Err(e) = session.clear_dtcs() {
                eprintln!("Clearing DTCs failed: {e}");
            }
        }
        Err(e) => eprintln!("Reading DTCs failed: {e}"),
    }
}
