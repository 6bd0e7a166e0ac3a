//! Reusable output surfaces keyed by `(size, format)`.
//!
//! Surfaces are leased with [`FramePool::acquire`] and handed back with
//! [`FramePool::release`]. Released surfaces keep their stale pixels (and any
//! GPU texture the device attached); whoever leases one must overwrite every
//! texel before sampling it. Idle surfaces are evicted least-recently-released
//! first once their combined size exceeds the byte budget.
//!
//! One pool serves every display, while each display has its own gpu device.
//! A texture is only valid on the device that created it, so a binding records
//! its owner's [`DeviceTag`] and a device claims a surface before drawing.
//!
//! The pool is `!Send`: it lives on the rendering thread and never locks.

use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::marker::PhantomData;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::{debug, trace, warn};

use crate::frame::{Frame, FrameSize, PixelFormat};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SurfaceKey {
    pub size: FrameSize,
    pub format: PixelFormat,
}

impl SurfaceKey {
    pub const fn new(size: FrameSize, format: PixelFormat) -> Self {
        Self { size, format }
    }

    pub const fn byte_len(&self) -> usize {
        self.size.pixel_count() * self.format.bytes_per_pixel()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SurfaceId(u64);

/// Identity of one gpu device instance. Never reused within a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceTag(u64);

impl DeviceTag {
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for DeviceTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "device-{}", self.0)
    }
}

#[derive(Debug)]
struct GpuBinding {
    owner: DeviceTag,
    texture: Option<wgpu::Texture>,
}

/// A leased buffer: CPU pixels plus the GPU texture a device may have bound to it.
#[derive(Debug)]
pub struct PooledSurface {
    id: SurfaceId,
    key: SurfaceKey,
    frame: Frame,
    gpu: Option<GpuBinding>,
}

impl PooledSurface {
    pub fn id(&self) -> SurfaceId {
        self.id
    }

    pub fn key(&self) -> SurfaceKey {
        self.key
    }

    pub fn frame(&self) -> &Frame {
        &self.frame
    }

    pub fn frame_mut(&mut self) -> &mut Frame {
        &mut self.frame
    }

    /// Device whose resources are bound to this surface, if any.
    pub fn gpu_owner(&self) -> Option<DeviceTag> {
        self.gpu.as_ref().map(|binding| binding.owner)
    }

    /// Binds the surface to `owner`, dropping anything another device left on it.
    ///
    /// Returns `true` when a foreign binding was dropped.
    pub(crate) fn claim(&mut self, owner: DeviceTag) -> bool {
        let previous = self.gpu_owner();
        if previous == Some(owner) {
            return false;
        }
        self.unbind();
        self.gpu = Some(GpuBinding {
            owner,
            texture: None,
        });
        if let Some(from) = previous {
            trace!(surface = ?self.id, %from, to = %owner, "surface_rebind");
        }
        previous.is_some()
    }

    /// The texture `owner` attached, never one created by another device.
    pub(crate) fn texture_for(&self, owner: DeviceTag) -> Option<&wgpu::Texture> {
        self.gpu
            .as_ref()
            .filter(|binding| binding.owner == owner)
            .and_then(|binding| binding.texture.as_ref())
    }

    pub(crate) fn attach_texture(&mut self, owner: DeviceTag, texture: wgpu::Texture) {
        self.claim(owner);
        if let Some(binding) = self.gpu.as_mut() {
            binding.texture = Some(texture);
        }
    }

    fn unbind(&mut self) {
        if let Some(texture) = self.gpu.take().and_then(|binding| binding.texture) {
            texture.destroy();
        }
    }

    /// Bytes accounted against the pool budget: CPU buffer plus the texture mirror.
    fn footprint(&self) -> usize {
        let has_texture = self
            .gpu
            .as_ref()
            .is_some_and(|binding| binding.texture.is_some());
        let gpu = if has_texture { self.key.byte_len() } else { 0 };
        self.key.byte_len() + gpu
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub foreign_releases: u64,
}

pub struct FramePool {
    budget_bytes: usize,
    idle: VecDeque<PooledSurface>,
    idle_bytes: usize,
    leased: HashSet<SurfaceId>,
    next_id: u64,
    stats: PoolStats,
    _render_thread: PhantomData<Rc<()>>,
}

impl FramePool {
    pub fn new(budget_bytes: usize) -> Self {
        Self {
            budget_bytes,
            idle: VecDeque::new(),
            idle_bytes: 0,
            leased: HashSet::new(),
            next_id: 0,
            stats: PoolStats::default(),
            _render_thread: PhantomData,
        }
    }

    /// Leases a surface for `key`, reusing the most recently released match.
    ///
    /// A reused surface still holds whatever the previous lease wrote.
    pub fn acquire(&mut self, key: SurfaceKey) -> PooledSurface {
        let reuse = self.idle.iter().rposition(|surface| surface.key == key);
        let surface = match reuse.and_then(|idx| self.idle.remove(idx)) {
            Some(surface) => {
                self.idle_bytes -= surface.footprint();
                self.stats.hits += 1;
                trace!(surface = ?surface.id, ?key, "pool_hit");
                surface
            }
            None => {
                self.stats.misses += 1;
                let id = SurfaceId(self.next_id);
                self.next_id += 1;
                debug!(surface = ?id, width = key.size.width, height = key.size.height, "pool_allocate");
                PooledSurface {
                    id,
                    key,
                    frame: Frame::zeroed(key.size, key.format),
                    gpu: None,
                }
            }
        };
        self.leased.insert(surface.id);
        surface
    }

    /// Returns a leased surface to the idle list, evicting over-budget idle surfaces.
    ///
    /// Surfaces this pool did not lease (or already took back) are dropped.
    pub fn release(&mut self, mut surface: PooledSurface) {
        if !self.leased.remove(&surface.id) {
            self.stats.foreign_releases += 1;
            warn!(surface = ?surface.id, "pool_release_unknown_surface");
            surface.unbind();
            return;
        }
        self.idle_bytes += surface.footprint();
        self.idle.push_back(surface);
        self.evict_over_budget();
    }

    fn evict_over_budget(&mut self) {
        while self.idle_bytes > self.budget_bytes {
            let Some(mut oldest) = self.idle.pop_front() else {
                break;
            };
            self.idle_bytes -= oldest.footprint();
            self.stats.evictions += 1;
            debug!(surface = ?oldest.id, idle_bytes = self.idle_bytes, "pool_evict");
            oldest.unbind();
        }
    }

    /// Drops idle bindings to a device that no longer exists.
    ///
    /// Surfaces still leased are rebound by the next device that draws into them.
    pub fn forget_device(&mut self, owner: DeviceTag) {
        let mut dropped = 0;
        for surface in &mut self.idle {
            if surface.gpu_owner() == Some(owner) {
                self.idle_bytes -= surface.footprint();
                surface.unbind();
                self.idle_bytes += surface.footprint();
                dropped += 1;
            }
        }
        if dropped > 0 {
            debug!(device = %owner, dropped, "pool_forget_device");
        }
    }

    /// Idle surfaces currently bound to `owner`.
    pub fn idle_bound_to(&self, owner: DeviceTag) -> usize {
        self.idle
            .iter()
            .filter(|surface| surface.gpu_owner() == Some(owner))
            .count()
    }

    /// Destroys every idle surface. Leases stay valid and may still be released.
    pub fn clear(&mut self) {
        for mut surface in self.idle.drain(..) {
            surface.unbind();
        }
        self.idle_bytes = 0;
    }

    pub fn is_leased(&self, id: SurfaceId) -> bool {
        self.leased.contains(&id)
    }

    pub fn leased_count(&self) -> usize {
        self.leased.len()
    }

    pub fn idle_count(&self) -> usize {
        self.idle.len()
    }

    pub fn idle_bytes(&self) -> usize {
        self.idle_bytes
    }

    pub fn budget_bytes(&self) -> usize {
        self.budget_bytes
    }

    pub fn stats(&self) -> PoolStats {
        self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(w: u32, h: u32) -> SurfaceKey {
        SurfaceKey::new(FrameSize::new(w, h), PixelFormat::Rgba8)
    }

    #[test]
    fn no_double_lease_for_same_key() {
        let mut pool = FramePool::new(1 << 20);
        let a = pool.acquire(key(4, 4));
        let b = pool.acquire(key(4, 4));
        assert_ne!(a.id(), b.id());
        assert_eq!(pool.leased_count(), 2);
        pool.release(a);
        let c = pool.acquire(key(4, 4));
        assert_ne!(c.id(), b.id());
        assert!(pool.is_leased(c.id()) && pool.is_leased(b.id()));
    }

    #[test]
    fn released_surface_is_reused_with_stale_content() {
        let mut pool = FramePool::new(1 << 20);
        let mut a = pool.acquire(key(2, 2));
        a.frame_mut().pixels_mut().fill(77);
        let id = a.id();
        pool.release(a);

        let again = pool.acquire(key(2, 2));
        assert_eq!(again.id(), id);
        assert!(again.frame().pixels().iter().all(|&b| b == 77));
        assert_eq!(pool.stats().hits, 1);
        assert_eq!(pool.stats().misses, 1);
    }

    #[test]
    fn key_mismatch_allocates_new_surface() {
        let mut pool = FramePool::new(1 << 20);
        let a = pool.acquire(key(2, 2));
        pool.release(a);
        let b = pool.acquire(key(3, 3));
        assert_eq!(b.frame().byte_len(), 36);
        assert_eq!(pool.idle_count(), 1);
    }

    #[test]
    fn evicts_least_recently_released_first() {
        // Each 4x4 rgba surface is 64 bytes; room for two idle surfaces.
        let mut pool = FramePool::new(128);
        let a = pool.acquire(key(4, 4));
        let b = pool.acquire(key(4, 4));
        let c = pool.acquire(key(4, 4));
        let (ida, idb, idc) = (a.id(), b.id(), c.id());
        pool.release(b);
        pool.release(a);
        pool.release(c);

        assert_eq!(pool.idle_count(), 2);
        assert_eq!(pool.stats().evictions, 1);
        assert!(pool.idle_bytes() <= pool.budget_bytes());
        // b was released first, so it is gone; the next two acquires reuse c then a.
        let first = pool.acquire(key(4, 4));
        let second = pool.acquire(key(4, 4));
        assert_eq!(first.id(), idc);
        assert_eq!(second.id(), ida);
        let third = pool.acquire(key(4, 4));
        assert_ne!(third.id(), idb);
    }

    #[test]
    fn double_release_is_ignored() {
        let mut pool = FramePool::new(1 << 20);
        let a = pool.acquire(key(1, 1));
        let forged = PooledSurface {
            id: a.id(),
            key: a.key(),
            frame: a.frame().clone(),
            gpu: None,
        };
        pool.release(a);
        pool.release(forged);
        assert_eq!(pool.idle_count(), 1);
        assert_eq!(pool.stats().foreign_releases, 1);
    }

    #[test]
    fn claim_drops_a_foreign_binding() {
        let mut pool = FramePool::new(1 << 20);
        let (first, second) = (DeviceTag::next(), DeviceTag::next());
        let mut a = pool.acquire(key(2, 2));
        assert!(!a.claim(first));
        assert!(!a.claim(first));
        assert_eq!(a.gpu_owner(), Some(first));
        pool.release(a);

        let mut again = pool.acquire(key(2, 2));
        assert!(again.texture_for(second).is_none());
        assert!(again.claim(second));
        assert_eq!(again.gpu_owner(), Some(second));
    }

    #[test]
    fn forget_device_unbinds_only_its_idle_surfaces() {
        let mut pool = FramePool::new(1 << 20);
        let (gone, alive) = (DeviceTag::next(), DeviceTag::next());
        let mut a = pool.acquire(key(2, 2));
        let mut b = pool.acquire(key(2, 2));
        a.claim(gone);
        b.claim(alive);
        pool.release(a);
        pool.release(b);

        pool.forget_device(gone);
        assert_eq!(pool.idle_bound_to(gone), 0);
        assert_eq!(pool.idle_bound_to(alive), 1);
        assert_eq!(pool.idle_count(), 2);
        assert_eq!(pool.idle_bytes(), 2 * key(2, 2).byte_len());
    }

    #[test]
    fn clear_drops_idle_but_keeps_leases() {
        let mut pool = FramePool::new(1 << 20);
        let a = pool.acquire(key(2, 2));
        let b = pool.acquire(key(2, 2));
        pool.release(a);
        pool.clear();
        assert_eq!(pool.idle_count(), 0);
        assert_eq!(pool.idle_bytes(), 0);
        pool.release(b);
        assert_eq!(pool.idle_count(), 1);
        assert_eq!(pool.leased_count(), 0);
    }
}
