//! Gait counting between the sensor threads and the trial machine.
//!
//! Every closed activation window is one stride. The sensor side pushes its
//! peak time down an unbounded channel; the control side drains it into a
//! sorted list and counts strides since a round began.

use crossbeam::channel::{self, Receiver, Sender};

/// Sensor-side end. Sending never blocks.
#[derive(Clone, Debug)]
pub struct GaitSink {
    tx: Sender<f64>,
}

impl GaitSink {
    pub fn record_peak(&self, peak_time: f64) {
        // a dropped counter only means nobody is gating on strides any more
        let _ = self.tx.send(peak_time);
    }
}

#[derive(Debug)]
pub struct GaitCounter {
    rx: Receiver<f64>,
    peaks: Vec<f64>,
}

pub fn gait_channel() -> (GaitSink, GaitCounter) {
    let (tx, rx) = channel::unbounded();
    (
        GaitSink { tx },
        GaitCounter {
            rx,
            peaks: Vec::new(),
        },
    )
}

impl GaitCounter {
    fn drain(&mut self) {
        let before = self.peaks.len();
        self.peaks.extend(self.rx.try_iter());
        // boots send independently, so arrivals can interleave out of order
        if self.peaks.len() > before && self.peaks.windows(2).any(|w| w[1] < w[0]) {
            self.peaks.sort_by(|a, b| a.total_cmp(b));
        }
    }

    /// Number of peaks with `peak_time >= t0`.
    pub fn count_since(&mut self, t0: f64) -> usize {
        self.drain();
        let first = self.peaks.partition_point(|&t| t < t0);
        self.peaks.len() - first
    }

    pub fn total(&mut self) -> usize {
        self.drain();
        self.peaks.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_count_since_is_inclusive() {
        let (sink, mut counter) = gait_channel();
        for t in [0.5, 1.0, 1.5, 2.0] {
            sink.record_peak(t);
        }
        assert_eq!(counter.count_since(0.0), 4);
        assert_eq!(counter.count_since(1.0), 3);
        assert_eq!(counter.count_since(1.01), 2);
        assert_eq!(counter.count_since(5.0), 0);
        assert_eq!(counter.total(), 4);
    }

    #[test]
    fn test_late_peaks_are_ordered() {
        let (sink, mut counter) = gait_channel();
        sink.record_peak(3.0);
        assert_eq!(counter.count_since(2.0), 1);
        sink.record_peak(1.0);
        sink.record_peak(2.5);
        assert_eq!(counter.count_since(2.0), 2);
        assert_eq!(counter.count_since(0.0), 3);
    }

    #[test]
    fn test_sinks_from_several_threads() {
        let (sink, mut counter) = gait_channel();
        let handles: Vec<_> = (0..2)
            .map(|k| {
                let sink = sink.clone();
                thread::spawn(move || {
                    for i in 0..100 {
                        sink.record_peak(i as f64 + k as f64 * 0.5);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(counter.count_since(50.0), 100);
    }

    #[test]
    fn test_send_after_counter_dropped() {
        let (sink, counter) = gait_channel();
        drop(counter);
        sink.record_peak(1.0);
    }
}
