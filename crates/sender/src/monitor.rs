//! Sensor simulado do nó.
//!
//! A aquisição real (sondas de pH, DHT22…) fica fora deste repositório; o
//! nó de bancada reporta os valores fixos da configuração, com uma variação
//! opcional para os gráficos do gateway não ficarem planos.

use radiolink_core::SensorReading;
use radiolink_core::config::MockSensorConfig;
use radiolink_core::coordinator::SensorSource;
use rand::Rng;
use rand::rngs::ThreadRng;

pub struct MockSensor {
    config: MockSensorConfig,
    rng: ThreadRng,
}

impl MockSensor {
    pub fn new(config: MockSensorConfig) -> Self {
        Self {
            config,
            rng: rand::thread_rng(),
        }
    }

    fn jittered(&mut self, base: f64) -> f64 {
        let j = self.config.jitter;
        if !j.is_finite() || j <= 0.0 {
            return base;
        }
        // Duas casas, como as sondas reportam
        ((base + self.rng.gen_range(-j..=j)) * 100.0).round() / 100.0
    }
}

impl SensorSource for MockSensor {
    fn read(&mut self) -> SensorReading {
        SensorReading {
            temperature: Some(self.jittered(self.config.temperature)),
            humidity: Some(self.jittered(self.config.humidity)),
            ph: Some(self.jittered(self.config.ph)),
            pressure: self.config.pressure.map(|p| self.jittered(p)),
            battery: self.config.battery,
            rssi: self.config.rssi,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn without_jitter_reports_configured_values() {
        let mut sensor = MockSensor::new(MockSensorConfig::default());
        let reading = sensor.read();
        assert_eq!(reading.temperature, Some(25.5));
        assert_eq!(reading.humidity, Some(60.0));
        assert_eq!(reading.ph, Some(7.0));
        assert!(reading.pressure.is_none());
    }

    #[test]
    fn gateway_fields_come_from_config() {
        let mut sensor = MockSensor::new(MockSensorConfig {
            pressure: Some(1013.25),
            battery: Some(3.7),
            rssi: Some(-92),
            ..Default::default()
        });
        let reading = sensor.read();
        assert_eq!(reading.pressure, Some(1013.25));
        assert_eq!(reading.battery, Some(3.7));
        assert_eq!(reading.rssi, Some(-92));
    }

    #[test]
    fn nan_jitter_is_ignored() {
        let mut sensor = MockSensor::new(MockSensorConfig {
            jitter: f64::NAN,
            ..Default::default()
        });
        assert_eq!(sensor.read().ph, Some(7.0));
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let mut sensor = MockSensor::new(MockSensorConfig {
            jitter: 0.5,
            ..Default::default()
        });
        for _ in 0..200 {
            let ph = sensor.read().ph.unwrap();
            assert!((6.5..=7.5).contains(&ph), "pH fora da faixa: {ph}");
        }
    }
}
