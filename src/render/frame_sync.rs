//! Frame pacing against the previous frame's submission
//!
//! Markers are double buffered: the newest submission stays in flight while
//! the CPU records the next frame, and only the one before it is waited on.
//! The CPU therefore runs at most one frame ahead without draining the queue.

use crate::core::error::Error;
use crate::core::types::Result;

/// Something that can block until a submission has completed.
pub trait FrameMarker {
    fn wait(&self) -> Result<()>;
}

/// Two completion markers: `markers[0]` is the newest submission,
/// `markers[1]` the one before it.
#[derive(Debug)]
pub struct FramePacer<M> {
    markers: [Option<M>; 2],
    waits: u64,
}

impl<M> Default for FramePacer<M> {
    fn default() -> Self {
        Self {
            markers: [None, None],
            waits: 0,
        }
    }
}

impl<M: FrameMarker> FramePacer<M> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for the frame before the last submitted one. The last
    /// submission is left in flight.
    pub fn begin_frame(&mut self) -> Result<()> {
        if let Some(previous) = self.markers[1].take() {
            previous.wait()?;
            self.waits += 1;
        }
        Ok(())
    }

    /// Record this frame's marker as the newest. The older marker becomes
    /// the one the next [`begin_frame`](Self::begin_frame) waits on; a marker
    /// two frames old that was never waited on is dropped.
    pub fn end_frame(&mut self, marker: M) {
        self.markers.swap(0, 1);
        self.markers[0] = Some(marker);
    }

    /// Wait for every outstanding submission, e.g. before teardown.
    pub fn finish(&mut self) -> Result<()> {
        for marker in [self.markers[1].take(), self.markers[0].take()].into_iter().flatten() {
            marker.wait()?;
            self.waits += 1;
        }
        Ok(())
    }

    /// Whether the newest submission has not been waited on yet.
    pub fn in_flight(&self) -> bool {
        self.markers[0].is_some()
    }

    /// Number of waits performed so far.
    pub fn waits(&self) -> u64 {
        self.waits
    }
}

/// Marker for one queue submission.
pub struct QueueMarker {
    device: wgpu::Device,
    index: wgpu::SubmissionIndex,
}

impl QueueMarker {
    pub fn new(device: wgpu::Device, index: wgpu::SubmissionIndex) -> Self {
        Self { device, index }
    }
}

impl FrameMarker for QueueMarker {
    fn wait(&self) -> Result<()> {
        self.device
            .poll(wgpu::PollType::Wait {
                submission_index: Some(self.index.clone()),
                timeout: None,
            })
            .map(|_| ())
            .map_err(|e| Error::Gpu(format!("Waiting for frame failed: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    struct FakeMarker {
        frame: u32,
        log: Rc<RefCell<Vec<u32>>>,
    }

    impl FrameMarker for FakeMarker {
        fn wait(&self) -> Result<()> {
            self.log.borrow_mut().push(self.frame);
            Ok(())
        }
    }

    #[test]
    fn test_waits_only_on_previous_frame() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut pacer = FramePacer::new();

        for frame in 0..3 {
            pacer.begin_frame().unwrap();
            pacer.end_frame(FakeMarker { frame, log: log.clone() });
        }
        pacer.begin_frame().unwrap();

        // Frame 2 was just submitted and is never the one waited on.
        assert_eq!(*log.borrow(), vec![0, 1]);
        assert_eq!(pacer.waits(), 2);
        assert!(pacer.in_flight());
    }

    #[test]
    fn test_first_frames_do_not_wait() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut pacer = FramePacer::new();
        pacer.begin_frame().unwrap();
        pacer.end_frame(FakeMarker { frame: 0, log: log.clone() });
        pacer.begin_frame().unwrap();
        assert!(log.borrow().is_empty());
        assert!(pacer.in_flight());
    }

    #[test]
    fn test_unwaited_marker_is_replaced() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut pacer = FramePacer::new();
        for frame in 0..3 {
            pacer.end_frame(FakeMarker { frame, log: log.clone() });
        }
        pacer.begin_frame().unwrap();
        assert_eq!(*log.borrow(), vec![1]);
    }

    #[test]
    fn test_finish_drains_both_markers() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut pacer = FramePacer::new();
        pacer.end_frame(FakeMarker { frame: 0, log: log.clone() });
        pacer.end_frame(FakeMarker { frame: 1, log: log.clone() });
        pacer.finish().unwrap();
        assert_eq!(*log.borrow(), vec![0, 1]);
        assert!(!pacer.in_flight());
    }
}
