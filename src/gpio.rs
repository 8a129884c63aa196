/// Carriage limit switch on a GPIO line
///
/// Uses libgpiod through gpiocdev. The switch pulls the line to ground, so
/// it is tripped when the line reads low. Without the `gpiod` feature only
/// the disabled switch is available.

use anyhow::{anyhow, Result};

use crate::drive::LimitSwitch;

#[cfg(feature = "gpiod")]
use gpiocdev::line::{Bias, Value};
#[cfg(feature = "gpiod")]
use gpiocdev::request::Request;

#[derive(Debug)]
pub struct GpioLimitSwitch {
    pin: Option<u32>,
    #[cfg(feature = "gpiod")]
    request: Option<Request>,
}

impl GpioLimitSwitch {
    /// Request `pin` on `chip_path` as a pulled-up input.
    #[cfg(feature = "gpiod")]
    pub fn open(chip_path: &str, pin: u32) -> Result<Self> {
        let request = Request::builder()
            .on_chip(chip_path)
            .with_consumer("leadscrew")
            .with_line(pin)
            .as_input()
            .with_bias(Bias::PullUp)
            .request()
            .map_err(|e| anyhow!("Failed to request limit switch line {} on {}: {}", pin, chip_path, e))?;
        log::info!(target: "gpio", "limit switch on {} line {}", chip_path, pin);
        Ok(Self {
            pin: Some(pin),
            request: Some(request),
        })
    }

    #[cfg(not(feature = "gpiod"))]
    pub fn open(_chip_path: &str, _pin: u32) -> Result<Self> {
        Err(anyhow!("GPIO support not compiled in. Enable 'gpiod' feature."))
    }

    /// No switch fitted; never trips.
    pub fn disabled() -> Self {
        Self {
            pin: None,
            #[cfg(feature = "gpiod")]
            request: None,
        }
    }

    pub fn pin(&self) -> Option<u32> {
        self.pin
    }
}

impl LimitSwitch for GpioLimitSwitch {
    fn is_tripped(&self) -> bool {
        #[cfg(feature = "gpiod")]
        {
            if let (Some(pin), Some(request)) = (self.pin, self.request.as_ref()) {
                return match request.value(pin) {
                    // active low
                    Ok(value) => value == Value::Inactive,
                    Err(e) => {
                        log::warn!(target: "gpio", "limit switch read failed, treating as tripped: {}", e);
                        true
                    }
                };
            }
        }
        false
    }
}
