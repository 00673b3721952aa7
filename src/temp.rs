use core::fmt::Debug;

/// A temperature sensor, typically the MCU die sensor.
pub trait TemperatureSource {
    type Error: Debug + defmt::Format;

    /// Fetch a new sample and return it in Celsius.
    fn read_celsius(&mut self) -> Result<f32, Self::Error>;
}

/// Read the temperature, logging and discarding any error. A failed read never stops an
/// analysis cycle.
pub fn read_best_effort<T: TemperatureSource>(sensor: &mut T) -> Option<f32> {
    sensor
        .read_celsius()
        .inspect_err(|e| defmt::error!("temp: failed to read die temperature: {:?}", e))
        .ok()
}

/// No sensor fitted.
pub struct NoSensor;

#[derive(Debug, Clone, Copy, PartialEq, Eq, defmt::Format)]
pub struct NotFitted;

impl TemperatureSource for NoSensor {
    type Error = NotFitted;

    fn read_celsius(&mut self) -> Result<f32, NotFitted> {
        Err(NotFitted)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub struct Fixed(pub f32);

    impl TemperatureSource for Fixed {
        type Error = NotFitted;

        fn read_celsius(&mut self) -> Result<f32, NotFitted> {
            Ok(self.0)
        }
    }

    #[test]
    fn best_effort() {
        assert_eq!(read_best_effort(&mut Fixed(41.5)), Some(41.5));
        assert_eq!(read_best_effort(&mut NoSensor), None);
    }
}
