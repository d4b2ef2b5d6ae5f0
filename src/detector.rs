use crate::{image::LinLogImage, rig::PoseKey};
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A single polarity event.
///
/// Coordinates follow the downstream image-bottom-origin convention:
/// `x` is the column index and `y` is `height - row`.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Event {
    /// Seconds since frame zero, `frame / frame_rate`.
    pub t: f64,
    pub x: u32,
    pub y: u32,
    /// +1 for a brightness increase, -1 for a decrease.
    pub polarity: i8,
}

/// All events produced by one pose at one frame.
#[derive(Clone, Debug, PartialEq)]
pub struct EventBatch {
    pub frame: u32,
    pub events: Vec<Event>,
}

impl EventBatch {
    fn empty(frame: u32) -> Self {
        Self {
            frame,
            events: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }
}

/// Differential comparator emulating a DVS photoreceptor array.
///
/// Holds one reference frame per tracked pose, seeded lazily by the first
/// observation for that pose. Subsequent observations report the pixels
/// whose lin-log brightness moved by strictly more than the threshold and
/// latch the reference at those pixels only; unchanged pixels keep whatever
/// value last crossed the threshold, which is what makes the model
/// asynchronous per pixel rather than a full-frame refresh.
pub struct EventDetector<K: PoseKey> {
    threshold: f64,
    frame_rate: f64,
    references: HashMap<K, LinLogImage>,
}

impl<K: PoseKey> EventDetector<K> {
    pub fn new(threshold: f64, frame_rate: f64) -> Self {
        Self {
            threshold,
            frame_rate,
            references: HashMap::new(),
        }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Number of poses with a seeded reference buffer.
    pub fn tracked_poses(&self) -> usize {
        self.references.len()
    }

    /// Reference buffer for `key`, if one has been seeded.
    pub fn reference(&self, key: &K) -> Option<&LinLogImage> {
        self.references.get(key)
    }

    /// Compare `frame` against the reference for `key`.
    ///
    /// The first observation for a pose seeds its reference and yields an
    /// empty batch. A difference of exactly the threshold is not an event.
    pub fn observe(&mut self, key: K, frame_index: u32, frame: &LinLogImage) -> EventBatch {
        let Some(reference) = self.references.get_mut(&key) else {
            self.references.insert(key, frame.clone());
            return EventBatch::empty(frame_index);
        };

        let (width, height) = frame.dimensions();
        let t = frame_index as f64 / self.frame_rate;

        let mut events = Vec::new();
        for (i, (new, old)) in frame
            .as_slice()
            .iter()
            .zip(reference.as_mut_slice().iter_mut())
            .enumerate()
        {
            let diff = new - *old;
            if diff.abs() > self.threshold {
                let row = i as u32 / width;
                events.push(Event {
                    t,
                    x: i as u32 % width,
                    y: height - row,
                    polarity: if diff > 0.0 { 1 } else { -1 },
                });
                *old = *new;
            }
        }

        EventBatch {
            frame: frame_index,
            events,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::LumaImage;
    use crate::rig::GridKey;

    const THRESHOLD: f64 = 0.1;
    const FRAME_RATE: f64 = 24.0;

    fn mapped(width: u32, height: u32, data: Vec<f64>) -> LinLogImage {
        LumaImage::new(width, height, data)
            .unwrap()
            .into_lin_log(crate::image::LINLOG_THRESHOLD)
    }

    #[test]
    fn first_observation_seeds_reference() {
        let mut detector: EventDetector<()> = EventDetector::new(THRESHOLD, FRAME_RATE);
        let frame = mapped(2, 2, vec![0.1, 0.2, 0.3, 0.4]);

        let batch = detector.observe((), 1, &frame);
        assert!(batch.is_empty());
        assert_eq!(detector.reference(&()).unwrap().as_slice(), frame.as_slice());
    }

    #[test]
    fn single_changed_pixel_yields_one_event() {
        let mut detector: EventDetector<()> = EventDetector::new(THRESHOLD, FRAME_RATE);
        let first = mapped(2, 2, vec![0.2; 4]);
        let mut bright = vec![0.2; 4];
        bright[1] = 0.8;
        let second = mapped(2, 2, bright);

        detector.observe((), 1, &first);
        let batch = detector.observe((), 2, &second);

        assert_eq!(
            batch.events,
            vec![Event {
                t: 2.0 / FRAME_RATE,
                x: 1,
                y: 2,
                polarity: 1,
            }]
        );

        // Only the changed pixel is latched to the new value.
        let reference = detector.reference(&()).unwrap().as_slice();
        assert_eq!(reference[1], second.as_slice()[1]);
        assert_eq!(reference[0], first.as_slice()[0]);
        assert_eq!(reference[2], first.as_slice()[2]);
    }

    #[test]
    fn darkening_pixel_has_negative_polarity() {
        let mut detector: EventDetector<()> = EventDetector::new(THRESHOLD, FRAME_RATE);
        detector.observe((), 1, &mapped(1, 1, vec![0.8]));
        let batch = detector.observe((), 2, &mapped(1, 1, vec![0.2]));

        assert_eq!(batch.len(), 1);
        assert_eq!(batch.events[0].polarity, -1);
    }

    #[test]
    fn exact_threshold_is_not_an_event() {
        // Synthesize lin-log values directly so the difference is exact.
        let mut detector: EventDetector<()> = EventDetector::new(0.5, FRAME_RATE);
        let mut base = mapped(1, 1, vec![0.5]);
        base.as_mut_slice()[0] = 4.0;
        detector.observe((), 1, &base);

        let mut at_threshold = base.clone();
        at_threshold.as_mut_slice()[0] = 4.5;
        assert!(detector.observe((), 2, &at_threshold).is_empty());

        let mut past_threshold = base.clone();
        past_threshold.as_mut_slice()[0] = 4.5 + 1e-6;
        assert_eq!(detector.observe((), 3, &past_threshold).len(), 1);
    }

    #[test]
    fn poses_track_independent_references() {
        let mut detector: EventDetector<GridKey> = EventDetector::new(THRESHOLD, FRAME_RATE);
        let (a, b) = (GridKey { s: 0, t: 0 }, GridKey { s: 0, t: 1 });

        detector.observe(a, 1, &mapped(1, 1, vec![0.2]));
        detector.observe(b, 1, &mapped(1, 1, vec![0.8]));
        assert_eq!(detector.tracked_poses(), 2);

        // The same frame brightens pose `a` but leaves pose `b` unchanged.
        let frame = mapped(1, 1, vec![0.8]);
        assert_eq!(detector.observe(a, 2, &frame).len(), 1);
        assert!(detector.observe(b, 2, &frame).is_empty());
    }

    #[test]
    fn event_y_is_flipped_to_bottom_origin() {
        let mut detector: EventDetector<()> = EventDetector::new(THRESHOLD, FRAME_RATE);
        detector.observe((), 1, &mapped(1, 3, vec![0.2, 0.2, 0.2]));
        let batch = detector.observe((), 2, &mapped(1, 3, vec![0.2, 0.2, 0.9]));

        // Bottom row of the buffer (row 2) reports y = height - 2 = 1.
        assert_eq!(batch.events, vec![Event { t: 2.0 / FRAME_RATE, x: 0, y: 1, polarity: 1 }]);
    }
}
