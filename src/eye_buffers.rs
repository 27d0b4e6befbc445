//! Per-eye render and resolve framebuffers.
//!
//! Each eye gets a multisampled render target (color + depth) and a
//! single-sample resolve target the compositor reads from. Both are sized to
//! the runtime's recommended resolution and live for the whole session.

use crate::device::{
    Attachment, AttachmentDesc, ClearColor, Extent, PassTarget, RenderDevice, TextureHandle,
};
use crate::error::{ConfigError, FramebufferError, FramebufferKind};
use crate::eye::Eye;
use crate::runtime::VrRuntime;

/// MSAA sample count used unless configured otherwise.
pub const DEFAULT_SAMPLE_COUNT: u32 = 4;

/// Accepts 1, 2, 4 or 8 samples.
pub fn validate_sample_count(samples: u32) -> Result<u32, ConfigError> {
    match samples {
        1 | 2 | 4 | 8 => Ok(samples),
        other => Err(ConfigError::SampleCount(other)),
    }
}

/// The three attachments belonging to one eye.
pub struct EyeBufferSet<T> {
    pub render_color: T,
    pub render_depth: T,
    pub resolve_color: T,
}

impl<T: Attachment> EyeBufferSet<T> {
    /// Render color, render depth and resolve color handles.
    pub fn handles(&self) -> [TextureHandle; 3] {
        [
            self.render_color.handle(),
            self.render_depth.handle(),
            self.resolve_color.handle(),
        ]
    }
}

pub struct EyeBufferManager<D: RenderDevice> {
    sets: Option<[EyeBufferSet<D::Texture>; 2]>,
    render_target_size: Extent,
    samples: u32,
}

impl<D: RenderDevice> EyeBufferManager<D> {
    pub fn new(samples: u32) -> Self {
        Self {
            sets: None,
            render_target_size: Extent::new(0, 0),
            samples,
        }
    }

    pub fn samples(&self) -> u32 {
        self.samples
    }

    /// Allocates both eyes at the runtime's recommended size.
    pub fn initialize<R: VrRuntime>(
        &mut self,
        device: &D,
        runtime: &R,
    ) -> Result<(), FramebufferError> {
        self.initialize_with_size(device, runtime.recommended_render_target_size())
    }

    /// Allocates both eyes at `size`, replacing any existing buffers.
    ///
    /// On error nothing stays allocated: attachments created before the
    /// failure are dropped on the way out.
    pub fn initialize_with_size(&mut self, device: &D, size: Extent) -> Result<(), FramebufferError> {
        self.shutdown();

        let left = Self::create_set(device, Eye::Left, size, self.samples)?;
        let right = Self::create_set(device, Eye::Right, size, self.samples)?;
        self.sets = Some([left, right]);
        self.render_target_size = size;

        log::info!(
            "eye buffers ready: {size} per eye, {}x MSAA",
            self.samples
        );
        Ok(())
    }

    fn create_set(
        device: &D,
        eye: Eye,
        size: Extent,
        samples: u32,
    ) -> Result<EyeBufferSet<D::Texture>, FramebufferError> {
        let allocate = |desc: AttachmentDesc| {
            device
                .create_attachment(&desc)
                .map_err(|err| FramebufferError::Allocation {
                    eye,
                    message: err.to_string(),
                })
        };

        let render_color = allocate(AttachmentDesc::color(
            format!("{eye} eye render color"),
            size,
            samples,
        ))?;
        let render_depth = allocate(AttachmentDesc::depth(
            format!("{eye} eye render depth"),
            size,
            samples,
        ))?;
        let status = device.framebuffer_status(&render_color, Some(&render_depth));
        if !status.is_complete() {
            log::error!("incomplete render framebuffer for {eye} eye: {status}");
            return Err(FramebufferError::Incomplete {
                eye,
                kind: FramebufferKind::Render,
                status,
            });
        }

        let resolve_color = allocate(
            AttachmentDesc::color(format!("{eye} eye resolve color"), size, 1).linear(),
        )?;
        let status = device.framebuffer_status(&resolve_color, None);
        if !status.is_complete() {
            log::error!("incomplete resolve framebuffer for {eye} eye: {status}");
            return Err(FramebufferError::Incomplete {
                eye,
                kind: FramebufferKind::Resolve,
                status,
            });
        }

        Ok(EyeBufferSet {
            render_color,
            render_depth,
            resolve_color,
        })
    }

    pub fn is_initialized(&self) -> bool {
        self.sets.is_some()
    }

    /// Size of every render and resolve target; zero before initialization.
    pub fn render_target_size(&self) -> Extent {
        self.render_target_size
    }

    pub fn set(&self, eye: Eye) -> Result<&EyeBufferSet<D::Texture>, FramebufferError> {
        self.sets
            .as_ref()
            .map(|sets| &sets[eye.index()])
            .ok_or(FramebufferError::NotInitialized)
    }

    /// Opens a pass on `eye`'s render framebuffer: full-size viewport, depth
    /// test on, color and depth cleared. Draws go there until the pass drops.
    pub fn bind_render_target<'f>(
        &'f self,
        device: &'f D,
        frame: &'f mut D::Frame,
        eye: Eye,
        clear: ClearColor,
    ) -> Result<D::Pass<'f>, FramebufferError>
    where
        D: 'f,
    {
        let set = self.set(eye)?;
        Ok(device.begin_pass(
            frame,
            PassTarget::Framebuffer {
                color: &set.render_color,
                depth: &set.render_depth,
            },
            clear,
        ))
    }

    /// Copies the render target into the resolve target, downsampling MSAA.
    pub fn resolve(&self, device: &D, frame: &mut D::Frame, eye: Eye) -> Result<(), FramebufferError> {
        let set = self.set(eye)?;
        device.resolve(frame, &set.render_color, &set.resolve_color);
        Ok(())
    }

    pub fn resolve_all(&self, device: &D, frame: &mut D::Frame) -> Result<(), FramebufferError> {
        for eye in Eye::BOTH {
            self.resolve(device, frame, eye)?;
        }
        Ok(())
    }

    /// The eye's resolve color attachment. Its content is replaced by the next
    /// resolve of that eye.
    pub fn resolved_texture(&self, eye: Eye) -> Option<&D::Texture> {
        self.sets.as_ref().map(|sets| &sets[eye.index()].resolve_color)
    }

    pub fn handles(&self, eye: Eye) -> Option<[TextureHandle; 3]> {
        self.set(eye).ok().map(EyeBufferSet::handles)
    }

    /// Releases both eyes. Safe to call repeatedly.
    pub fn shutdown(&mut self) {
        if self.sets.take().is_some() {
            log::debug!("eye buffers released");
        }
        self.render_target_size = Extent::new(0, 0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::AttachmentKind;
    use crate::error::FramebufferKind;
    use crate::testing::{DeviceCall, FakeDevice, ScriptedRuntime};

    fn manager() -> EyeBufferManager<FakeDevice> {
        EyeBufferManager::new(DEFAULT_SAMPLE_COUNT)
    }

    #[test]
    fn sample_counts_are_validated() {
        assert_eq!(validate_sample_count(4), Ok(4));
        assert_eq!(validate_sample_count(1), Ok(1));
        assert_eq!(validate_sample_count(3), Err(ConfigError::SampleCount(3)));
    }

    #[test]
    fn initialize_at_recommended_size_then_shutdown_releases_all() {
        let device = FakeDevice::new();
        let runtime = ScriptedRuntime::new().render_target_size(1512, 1680);
        let mut buffers = manager();

        buffers.initialize(&device, &runtime).unwrap();
        assert!(buffers.is_initialized());
        assert_eq!(buffers.render_target_size(), Extent::new(1512, 1680));
        assert_eq!(device.live_handles(), 6);

        let handles: Vec<_> = Eye::BOTH
            .iter()
            .flat_map(|&eye| buffers.handles(eye).unwrap())
            .collect();
        for eye in Eye::BOTH {
            let set = buffers.set(eye).unwrap();
            assert!(device.framebuffer_status(&set.render_color, Some(&set.render_depth)).is_complete());
            assert!(device.framebuffer_status(&set.resolve_color, None).is_complete());
            assert_eq!(set.render_color.samples(), 4);
            assert_eq!(set.resolve_color.samples(), 1);
        }

        buffers.shutdown();
        assert!(!buffers.is_initialized());
        assert_eq!(device.live_handles(), 0);
        let log = device.log();
        assert!(handles.iter().all(|h| !log.borrow().live.contains(h)));
        assert!(buffers.resolved_texture(Eye::Left).is_none());
    }

    #[test]
    fn repeated_cycles_do_not_leak() {
        let device = FakeDevice::new();
        let mut buffers = manager();
        for _ in 0..5 {
            buffers.initialize_with_size(&device, Extent::new(64, 64)).unwrap();
            assert_eq!(device.live_handles(), 6);
            buffers.shutdown();
            assert_eq!(device.live_handles(), 0);
        }
        // re-initializing without a shutdown replaces the old set
        buffers.initialize_with_size(&device, Extent::new(64, 64)).unwrap();
        buffers.initialize_with_size(&device, Extent::new(32, 32)).unwrap();
        assert_eq!(device.live_handles(), 6);
    }

    #[test]
    fn shutdown_is_idempotent() {
        let device = FakeDevice::new();
        let mut buffers = manager();
        buffers.shutdown();
        buffers.initialize_with_size(&device, Extent::new(16, 16)).unwrap();
        buffers.shutdown();
        buffers.shutdown();
        assert_eq!(device.live_handles(), 0);
    }

    #[test]
    fn resolved_texture_matches_render_size() {
        let device = FakeDevice::new();
        let mut buffers = manager();
        buffers.initialize_with_size(&device, Extent::new(1512, 1680)).unwrap();

        let mut frame = device.begin_frame();
        buffers.resolve(&device, &mut frame, Eye::Right).unwrap();
        let resolved = buffers.resolved_texture(Eye::Right).unwrap();
        assert_eq!(resolved.extent(), buffers.render_target_size());

        let set = buffers.set(Eye::Right).unwrap();
        let log = device.log();
        assert_eq!(
            log.borrow().calls.last(),
            Some(&DeviceCall::Resolve {
                src: set.render_color.handle(),
                dst: set.resolve_color.handle(),
            })
        );
    }

    #[test]
    fn single_sample_targets_are_still_resolved() {
        let device = FakeDevice::new();
        let mut buffers = EyeBufferManager::new(1);
        buffers.initialize_with_size(&device, Extent::new(32, 32)).unwrap();

        let mut frame = device.begin_frame();
        buffers.resolve_all(&device, &mut frame).unwrap();
        let log = device.log();
        assert_eq!(
            log.borrow().count(|c| matches!(c, DeviceCall::Resolve { .. })),
            2
        );
    }

    #[test]
    fn bind_sets_full_viewport_on_that_eye() {
        let device = FakeDevice::new();
        let mut buffers = manager();
        buffers.initialize_with_size(&device, Extent::new(100, 50)).unwrap();
        let left = buffers.set(Eye::Left).unwrap().render_color.handle();

        let mut frame = device.begin_frame();
        let pass = buffers
            .bind_render_target(&device, &mut frame, Eye::Left, ClearColor::default())
            .unwrap();
        assert_eq!(pass.target, Some(left));
        assert_eq!(pass.viewport, Extent::new(100, 50));
    }

    #[test]
    fn uninitialized_operations_fail() {
        let device = FakeDevice::new();
        let buffers = manager();
        let mut frame = device.begin_frame();
        assert!(matches!(
            buffers.bind_render_target(&device, &mut frame, Eye::Left, ClearColor::default()),
            Err(FramebufferError::NotInitialized)
        ));
        assert_eq!(
            buffers.resolve(&device, &mut frame, Eye::Left),
            Err(FramebufferError::NotInitialized)
        );
    }

    #[test]
    fn unsupported_sample_count_is_reported_and_released() {
        let device = FakeDevice::new().with_supported_samples(&[1]);
        let mut buffers = manager();

        let err = buffers
            .initialize_with_size(&device, Extent::new(64, 64))
            .unwrap_err();
        assert!(matches!(
            err,
            FramebufferError::Incomplete {
                eye: Eye::Left,
                kind: FramebufferKind::Render,
                ..
            }
        ));
        assert!(!buffers.is_initialized());
        assert_eq!(device.live_handles(), 0);
    }

    #[test]
    fn oversized_target_is_incomplete() {
        let device = FakeDevice::new().with_max_dimension(1024);
        let mut buffers = manager();
        assert!(buffers.initialize_with_size(&device, Extent::new(1512, 1680)).is_err());
        assert_eq!(device.live_handles(), 0);
    }

    #[test]
    fn allocation_failure_midway_releases_earlier_attachments() {
        let device = FakeDevice::new();
        // left eye fully allocated, right eye fails on its depth buffer
        device.fail_after_allocations(4);
        let mut buffers = manager();

        let err = buffers
            .initialize_with_size(&device, Extent::new(64, 64))
            .unwrap_err();
        assert!(matches!(err, FramebufferError::Allocation { eye: Eye::Right, .. }));
        assert_eq!(device.live_handles(), 0);

        let log = device.log();
        let depths = log.borrow().count(|c| {
            matches!(c, DeviceCall::Create { kind: AttachmentKind::Depth, .. })
        });
        assert_eq!(depths, 1);
    }
}
