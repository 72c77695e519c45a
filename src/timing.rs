/*
    MediaBay
    https://github.com/dbalsom/mediabay

    Copyright 2024 Daniel Balsom

    Permission is hereby granted, free of charge, to any person obtaining a
    copy of this software and associated documentation files (the “Software”),
    to deal in the Software without restriction, including without limitation
    the rights to use, copy, modify, merge, publish, distribute, sublicense,
    and/or sell copies of the Software, and to permit persons to whom the
    Software is furnished to do so, subject to the following conditions:

    The above copyright notice and this permission notice shall be included in
    all copies or substantial portions of the Software.

    THE SOFTWARE IS PROVIDED “AS IS”, WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
    IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
    FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
    AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
    LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING
    FROM, OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER
    DEALINGS IN THE SOFTWARE.

    --------------------------------------------------------------------------

    src/timing.rs

    Rotational timing of floppy media. Latencies are computed on demand from
    the current slot settings, so a change of RPM class or turbo mode takes
    effect on the next access.
*/
use std::{
    fmt::{self, Display, Formatter},
    time::Duration,
};

use strum::EnumIter;

use crate::StandardFormat;

/// Fixed per-sector latency in turbo mode.
pub const TURBO_SECTOR_LATENCY: Duration = Duration::from_micros(1);
/// Fixed per-track latency in turbo mode.
pub const TURBO_TRACK_LATENCY: Duration = Duration::from_micros(10);
pub const DEFAULT_RPM: u32 = 300;

/// How far a drive's spindle runs below its nominal speed.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, EnumIter)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum RpmClass {
    #[default]
    Perfect,
    OnePercentSlow,
    OneAndHalfPercentSlow,
    TwoPercentSlow,
}

impl RpmClass {
    /// Fraction of nominal speed lost.
    pub fn slowdown(&self) -> f64 {
        match self {
            RpmClass::Perfect => 0.0,
            RpmClass::OnePercentSlow => 0.01,
            RpmClass::OneAndHalfPercentSlow => 0.015,
            RpmClass::TwoPercentSlow => 0.02,
        }
    }
}

impl Display for RpmClass {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self {
            RpmClass::Perfect => write!(f, "Perfect RPM"),
            RpmClass::OnePercentSlow => write!(f, "1% below perfect RPM"),
            RpmClass::OneAndHalfPercentSlow => write!(f, "1.5% below perfect RPM"),
            RpmClass::TwoPercentSlow => write!(f, "2% below perfect RPM"),
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct TimingModel {
    pub nominal_rpm: u32,
    pub rpm_class: RpmClass,
    pub turbo: bool,
}

impl Default for TimingModel {
    fn default() -> Self {
        TimingModel {
            nominal_rpm: DEFAULT_RPM,
            rpm_class: RpmClass::Perfect,
            turbo: false,
        }
    }
}

impl TimingModel {
    pub fn new(nominal_rpm: u32, rpm_class: RpmClass, turbo: bool) -> Self {
        TimingModel {
            nominal_rpm,
            rpm_class,
            turbo,
        }
    }

    /// Build a timing model for the given media. 1.2MB and 1.25MB 5.25" media spin at 360 RPM,
    /// everything else at 300.
    pub fn for_format(format: Option<StandardFormat>, rpm_class: RpmClass, turbo: bool) -> Self {
        let nominal_rpm = format.map(|f| f.rpm()).unwrap_or(DEFAULT_RPM);
        TimingModel::new(nominal_rpm, rpm_class, turbo)
    }

    /// Effective spindle speed after slowdown.
    pub fn effective_rpm(&self) -> f64 {
        self.nominal_rpm as f64 * (1.0 - self.rpm_class.slowdown())
    }

    pub fn rotation_period(&self) -> Duration {
        Duration::from_secs_f64(60.0 / self.effective_rpm())
    }

    /// Expected completion delay of a single sector access: the time the sector takes to pass
    /// under the head plus an average rotational delay of half a revolution.
    pub fn sector_latency(&self, sectors_per_track: u32) -> Duration {
        if self.turbo {
            return TURBO_SECTOR_LATENCY;
        }
        let rotation = self.rotation_period();
        rotation / sectors_per_track.max(1) + rotation / 2
    }

    pub fn track_latency(&self) -> Duration {
        if self.turbo {
            return TURBO_TRACK_LATENCY;
        }
        self.rotation_period()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn rotation_periods() {
        let model = TimingModel::default();
        assert_eq!(model.rotation_period(), Duration::from_millis(200));

        let hd = TimingModel::for_format(Some(StandardFormat::PcFloppy1200), RpmClass::Perfect, false);
        assert_eq!(hd.nominal_rpm, 360);

        let slow = TimingModel::new(300, RpmClass::TwoPercentSlow, false);
        assert!(slow.rotation_period() > model.rotation_period());
    }

    #[test]
    fn sector_latency_components() {
        let model = TimingModel::default();
        // 200ms / 10 + 100ms
        assert_eq!(model.sector_latency(10), Duration::from_millis(120));
        assert_eq!(model.track_latency(), Duration::from_millis(200));
    }

    #[test]
    fn turbo_is_always_faster() {
        for class in RpmClass::iter() {
            for rpm in [300, 360] {
                let normal = TimingModel::new(rpm, class, false);
                let turbo = TimingModel::new(rpm, class, true);
                assert!(turbo.sector_latency(18) < normal.sector_latency(18));
                assert!(turbo.track_latency() < normal.track_latency());
            }
        }
    }
}
