// Sensor boards: raw reading storage and sample statistics

use std::time::Duration;

use super::group::{BoardGroup, BoardKind};
use super::{Board, BoardError, Target};
use crate::can::{CanFrame, SharedBus, MAX_PAYLOAD_LEN};
use crate::protocol::Command;

pub struct SensorBoardGroup {
    group: BoardGroup,
    readings_count: usize,
    readings: Vec<Option<[u8; MAX_PAYLOAD_LEN]>>,
}

impl SensorBoardGroup {
    /// `readings_count` is how many values one device reports
    pub fn new(
        name: &str,
        max_boards: usize,
        devices_per_board: usize,
        readings_count: usize,
        bus: &SharedBus,
    ) -> Self {
        Self {
            group: BoardGroup::new(name, BoardKind::Sensor, max_boards, devices_per_board, bus),
            readings_count,
            readings: Vec::new(),
        }
    }

    pub fn with_slow_scan(mut self, slow: bool) -> Self {
        self.group.set_slow_scan(slow);
        self
    }

    pub fn with_measuring_mode_limit(mut self, limit: u8) -> Self {
        self.group.set_measuring_mode_limit(limit);
        self
    }

    pub fn add(&mut self, name: &str, can_in: u16, can_out: u16) -> Result<usize, BoardError> {
        let ordinal = self.group.add(name, can_in, can_out)?;
        self.readings.push(None);
        Ok(ordinal)
    }

    pub fn readings_count(&self) -> usize {
        self.readings_count
    }

    /// Last payload a device streamed, uninterpreted
    pub fn raw_reading(&self, ordinal: usize) -> Option<[u8; MAX_PAYLOAD_LEN]> {
        self.readings.get(ordinal).copied().flatten()
    }

    /// Ask devices to stream readings the board has already processed
    pub fn start_calculated_streaming(&mut self, target: Target) -> Result<(), BoardError> {
        for ordinal in self.group.targets(target)? {
            if self.group.devices()[ordinal].is_alive() {
                self.group
                    .message_send(ordinal, Command::MeasureContinuousReturnCalculated, &[])?;
                self.group.delay(Duration::from_millis(1));
            }
        }
        Ok(())
    }
}

impl Board for SensorBoardGroup {
    fn group(&self) -> &BoardGroup {
        &self.group
    }

    fn group_mut(&mut self) -> &mut BoardGroup {
        &mut self.group
    }

    fn decode_specific(&mut self, frame: &CanFrame, ordinal: usize) -> bool {
        match frame.command_kind() {
            Some(Command::MeasureSending) | Some(Command::MeasureCalculatedSending) => {}
            _ => return false,
        }
        let now = self.group.now_ms();
        let Some(slot) = self.readings.get_mut(ordinal) else {
            return false;
        };
        *slot = Some(frame.payload7());
        if let Ok(device) = self.group.device_mut(ordinal) {
            device.last_reading_at_ms = Some(now);
        }
        true
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Stats {
    pub mean: f32,
    pub sd: f32,
}

/// Mean and population standard deviation of a sample window
pub fn standard_deviation(samples: &[f32]) -> Option<Stats> {
    if samples.is_empty() {
        return None;
    }
    let n = samples.len() as f32;
    let mean = samples.iter().sum::<f32>() / n;
    let variance = samples.iter().map(|s| (s - mean).powi(2)).sum::<f32>() / n;
    Some(Stats {
        mean,
        sd: variance.sqrt(),
    })
}

/// Mean of the samples within `sigma` standard deviations of the mean.
/// `None` when no sample survives the filter.
pub fn outlier_filtered_mean(samples: &[f32], stats: Stats, sigma: f32) -> Option<f32> {
    let band = sigma * stats.sd;
    let (sum, count) = samples
        .iter()
        .filter(|&&s| (s - stats.mean).abs() <= band)
        .fold((0.0f32, 0usize), |(sum, count), &s| (sum + s, count + 1));
    if count == 0 {
        None
    } else {
        Some(sum / count as f32)
    }
}
