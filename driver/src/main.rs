use ion::logging::{self, Logger};
use plasma::driver::context::DriverContext;
use plasma::driver::MediaDriver;
use std::process;
use std::sync::atomic::Ordering;

/// Stand-alone media driver. Takes no arguments; every knob is a property
/// resolved from the environment. Exits zero on a clean shutdown and
/// non-zero when initialization fails.
fn main() {
    let log = logging::init();

    let context = match DriverContext::from_properties() {
        Ok(context) => context,
        Err(err) => {
            logging::crit!(log, "invalid configuration"; "context" => "startup", "error" => %err);
            process::exit(1);
        }
    };

    let mut driver = match MediaDriver::launch(context, &log) {
        Ok(driver) => driver,
        Err(err) => {
            logging::crit!(log, "driver failed to start"; "context" => "startup", "error" => %err);
            process::exit(1);
        }
    };

    install_signal_handler(&driver, &log);

    driver.wait();
    driver.shutdown();
}

fn install_signal_handler(driver: &MediaDriver, log: &Logger) {
    let running = driver.running();
    let log = log.clone();

    ctrlc::set_handler(move || {
        logging::info!(log, "shutdown requested"; "context" => "signal");
        running.store(false, Ordering::Release);
    })
    .expect("Signal handler installation failed");
}
