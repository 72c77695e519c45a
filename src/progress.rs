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

    src/progress.rs

    Progress reporting for long-running operations such as fixed-size image
    creation and differencing chain repair.
*/
use std::sync::Arc;

/// Status messages delivered to a [`ProgressCallback`].
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum ProgressStatus {
    /// Sent first, to indicate the operation will report fractional progress.
    ProgressSupport,
    /// Fraction of the operation completed, between 0.0 and 1.0.
    Progress(f64),
    Complete,
}

pub type ProgressCallback = Arc<dyn Fn(ProgressStatus) + Send + Sync>;

/// Tracks progress through a fixed number of steps and forwards it to an optional callback.
pub(crate) struct ProgressReporter {
    callback: Option<ProgressCallback>,
    total: u64,
    done: u64,
}

impl ProgressReporter {
    pub(crate) fn new(callback: Option<ProgressCallback>, total: u64) -> Self {
        if let Some(cb) = &callback {
            cb(ProgressStatus::ProgressSupport);
        }
        ProgressReporter {
            callback,
            total: total.max(1),
            done: 0,
        }
    }

    pub(crate) fn step(&mut self) {
        self.advance(1);
    }

    pub(crate) fn advance(&mut self, steps: u64) {
        self.done = (self.done + steps).min(self.total);
        if let Some(cb) = &self.callback {
            cb(ProgressStatus::Progress(self.done as f64 / self.total as f64));
        }
    }

    pub(crate) fn complete(self) {
        if let Some(cb) = &self.callback {
            cb(ProgressStatus::Complete);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn reports_in_order() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let cb: ProgressCallback = Arc::new(move |status| sink.lock().unwrap().push(status));

        let mut reporter = ProgressReporter::new(Some(cb), 4);
        reporter.step();
        reporter.advance(3);
        reporter.step();
        reporter.complete();

        let seen = seen.lock().unwrap();
        assert_eq!(seen[0], ProgressStatus::ProgressSupport);
        assert_eq!(seen[1], ProgressStatus::Progress(0.25));
        assert_eq!(seen[2], ProgressStatus::Progress(1.0));
        assert_eq!(seen[3], ProgressStatus::Progress(1.0));
        assert_eq!(seen[4], ProgressStatus::Complete);
    }
}
