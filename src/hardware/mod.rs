//! `HardwareDog`: the trait boundary between the orchestrator and the
//! physical (or simulated) quadruped. A real implementation talks to the
//! vendor SDK over its own driver thread; `MockHardwareDog` is a
//! dependency-free stand-in used in tests and for running the orchestrator
//! without hardware attached.

use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Mutex;

use anyhow::Result;
use async_trait::async_trait;

/// Touch sensor reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TouchReading {
    None,
    Left,
    Right,
    /// Front-to-back stroke.
    Ls,
    /// Back-to-front stroke.
    Rs,
}

/// RGB lightbar display style, mirrored from the vendor SDK's `rgb_strip`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LightStyle {
    Breath,
    Boom,
    BarkPattern,
    Solid,
}

/// A color as 0..255 RGB components.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RgbColor(pub u8, pub u8, pub u8);

/// Accelerometer/gyroscope triple.
#[derive(Debug, Clone, Copy, Default)]
pub struct Vector3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

/// The hardware boundary: head/leg/tail servos, touch/ear/IMU sensors,
/// distance, lightbar, battery, and speaker/music playback.
///
/// Only `HeadController` writes head joints and only `ActionLibrary` writes
/// leg/tail joints; both are serialized behind whatever command lock the
/// concrete driver provides internally.
#[async_trait]
pub trait HardwareDog: Send + Sync {
    /// Move the head servos to absolute (yaw, roll, pitch) degrees.
    async fn head_move_raw(&self, yaw: f32, roll: f32, pitch: f32, immediately: bool, speed: u32) -> Result<()>;

    /// Current head servo angles as (yaw, roll, pitch).
    async fn head_current_angles(&self) -> Result<(f32, f32, f32)>;

    /// Move leg joints to an absolute angle vector (implementation-defined
    /// ordering, typically 12 values: 3 per leg).
    async fn legs_move(&self, angles: &[f32], speed: u32) -> Result<()>;

    /// Current leg joint angles.
    async fn leg_current_angles(&self) -> Result<Vec<f32>>;

    /// Run a named built-in action macro at the driver level (e.g. a vendor
    /// gait), optionally bounded to a step count.
    async fn do_action(&self, name: &str, speed: u32, step_count: Option<u32>) -> Result<()>;

    /// Block until any in-flight leg motion completes.
    async fn wait_legs_done(&self) -> Result<()>;

    /// Block until any in-flight head motion completes.
    async fn wait_head_done(&self) -> Result<()>;

    /// Stop all body motion immediately.
    async fn body_stop(&self) -> Result<()>;

    /// Current dual touch-pad reading.
    async fn touch_read(&self) -> Result<TouchReading>;

    /// Whether the ear array currently detects sound.
    async fn ears_detected(&self) -> Result<bool>;

    /// Ear array sound direction, degrees 0..360.
    async fn ears_read(&self) -> Result<f32>;

    /// Accelerometer reading.
    async fn acc_data(&self) -> Result<Vector3>;

    /// Gyroscope reading.
    async fn gyro_data(&self) -> Result<Vector3>;

    /// Ultrasonic distance in centimeters. May fail; callers treat errors as
    /// "unknown" rather than fatal.
    async fn distance(&self) -> Result<f32>;

    /// Set the lightbar's display mode.
    async fn rgb_set_mode(&self, style: LightStyle, color: RgbColor, breaths_per_second: f32, brightness: f32) -> Result<()>;

    /// Push an explicit per-LED frame to the lightbar.
    async fn rgb_display(&self, lights: &[RgbColor]) -> Result<()>;

    /// Battery voltage in volts.
    async fn get_battery_voltage(&self) -> Result<f32>;

    /// Play a PCM/WAV file through the onboard speaker, blocking the calling
    /// worker-pool task until playback completes.
    async fn speak_block(&self, filename: &str, volume: f32) -> Result<()>;

    /// Play a music file asynchronously (fire-and-forget).
    async fn music_play(&self, path: &str, volume: f32) -> Result<()>;

    /// Release hardware resources. Called once during orchestrator shutdown.
    async fn close(&self) -> Result<()>;
}

/// Dependency-free `HardwareDog` used for tests and hardware-less runs.
///
/// Head/leg state is tracked in-memory so that round-trip behavior
/// (`head_move_raw` followed by `head_current_angles`) matches what a real
/// driver would report.
pub struct MockHardwareDog {
    head: Mutex<(f32, f32, f32)>,
    legs: Mutex<Vec<f32>>,
    touch: Mutex<TouchReading>,
    battery_millivolts: AtomicI32,
}

impl MockHardwareDog {
    pub fn new() -> Self {
        Self {
            head: Mutex::new((0.0, 0.0, 0.0)),
            legs: Mutex::new(vec![0.0; 12]),
            touch: Mutex::new(TouchReading::None),
            battery_millivolts: AtomicI32::new(7800),
        }
    }

    /// Test hook: simulate a touch-sensor edge.
    pub fn set_touch(&self, reading: TouchReading) {
        *self.touch.lock().unwrap() = reading;
    }
}

impl Default for MockHardwareDog {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HardwareDog for MockHardwareDog {
    async fn head_move_raw(&self, yaw: f32, roll: f32, pitch: f32, _immediately: bool, _speed: u32) -> Result<()> {
        *self.head.lock().unwrap() = (yaw, roll, pitch);
        Ok(())
    }

    async fn head_current_angles(&self) -> Result<(f32, f32, f32)> {
        Ok(*self.head.lock().unwrap())
    }

    async fn legs_move(&self, angles: &[f32], _speed: u32) -> Result<()> {
        *self.legs.lock().unwrap() = angles.to_vec();
        Ok(())
    }

    async fn leg_current_angles(&self) -> Result<Vec<f32>> {
        Ok(self.legs.lock().unwrap().clone())
    }

    async fn do_action(&self, _name: &str, _speed: u32, _step_count: Option<u32>) -> Result<()> {
        Ok(())
    }

    async fn wait_legs_done(&self) -> Result<()> {
        Ok(())
    }

    async fn wait_head_done(&self) -> Result<()> {
        Ok(())
    }

    async fn body_stop(&self) -> Result<()> {
        Ok(())
    }

    async fn touch_read(&self) -> Result<TouchReading> {
        Ok(*self.touch.lock().unwrap())
    }

    async fn ears_detected(&self) -> Result<bool> {
        Ok(false)
    }

    async fn ears_read(&self) -> Result<f32> {
        Ok(0.0)
    }

    async fn acc_data(&self) -> Result<Vector3> {
        Ok(Vector3 { x: 0.0, y: 0.0, z: 1.0 })
    }

    async fn gyro_data(&self) -> Result<Vector3> {
        Ok(Vector3::default())
    }

    async fn distance(&self) -> Result<f32> {
        Ok(100.0)
    }

    async fn rgb_set_mode(&self, _style: LightStyle, _color: RgbColor, _breaths_per_second: f32, _brightness: f32) -> Result<()> {
        Ok(())
    }

    async fn rgb_display(&self, _lights: &[RgbColor]) -> Result<()> {
        Ok(())
    }

    async fn get_battery_voltage(&self) -> Result<f32> {
        Ok(self.battery_millivolts.load(Ordering::Relaxed) as f32 / 1000.0)
    }

    async fn speak_block(&self, _filename: &str, _volume: f32) -> Result<()> {
        Ok(())
    }

    async fn music_play(&self, _path: &str, _volume: f32) -> Result<()> {
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn head_move_round_trips_through_mock() {
        let dog = MockHardwareDog::new();
        dog.head_move_raw(12.0, -3.0, 5.0, true, 50).await.unwrap();
        let (yaw, roll, pitch) = dog.head_current_angles().await.unwrap();
        assert_eq!((yaw, roll, pitch), (12.0, -3.0, 5.0));
    }

    #[tokio::test]
    async fn touch_reading_reflects_set_touch() {
        let dog = MockHardwareDog::new();
        assert_eq!(dog.touch_read().await.unwrap(), TouchReading::None);
        dog.set_touch(TouchReading::Ls);
        assert_eq!(dog.touch_read().await.unwrap(), TouchReading::Ls);
    }

    #[tokio::test]
    async fn battery_voltage_is_reasonable() {
        let dog = MockHardwareDog::new();
        let v = dog.get_battery_voltage().await.unwrap();
        assert!(v > 6.0 && v < 9.0);
    }
}
