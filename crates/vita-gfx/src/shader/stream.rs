use std::collections::HashMap;
use std::mem::size_of;

use bytemuck::{Pod, Zeroable};

use crate::driver::{IndexSource, VertexStream};

/// Position-only vertex used by the full-screen clear triangle.
#[repr(C)]
#[derive(Debug, Copy, Clone, Default, PartialEq, Pod, Zeroable)]
pub struct ClearVertex {
    pub x: f32,
    pub y: f32,
}

/// Position + packed RGBA8 color.
#[repr(C)]
#[derive(Debug, Copy, Clone, Default, PartialEq, Pod, Zeroable)]
pub struct BasicVertex {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub color: u32,
}

/// Vertex layout × indexing mode a vertex program is created for.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum VertexStreamType {
    ClearIndex16,
    ClearIndex32,
    ClearInstance16,
    ClearInstance32,
    BasicIndex16,
    BasicIndex32,
    BasicInstance16,
    BasicInstance32,
}

impl VertexStreamType {
    pub const ALL: [VertexStreamType; 8] = [
        VertexStreamType::ClearIndex16,
        VertexStreamType::ClearIndex32,
        VertexStreamType::ClearInstance16,
        VertexStreamType::ClearInstance32,
        VertexStreamType::BasicIndex16,
        VertexStreamType::BasicIndex32,
        VertexStreamType::BasicInstance16,
        VertexStreamType::BasicInstance32,
    ];

    /// Stream descriptor for this type.
    pub fn descriptor(self) -> VertexStream {
        use VertexStreamType::*;

        let stride = match self {
            ClearIndex16 | ClearIndex32 | ClearInstance16 | ClearInstance32 => size_of::<ClearVertex>(),
            BasicIndex16 | BasicIndex32 | BasicInstance16 | BasicInstance32 => size_of::<BasicVertex>(),
        };
        let index_source = match self {
            ClearIndex16 | BasicIndex16 => IndexSource::Index16,
            ClearIndex32 | BasicIndex32 => IndexSource::Index32,
            ClearInstance16 | BasicInstance16 => IndexSource::Instance16,
            ClearInstance32 | BasicInstance32 => IndexSource::Instance32,
        };

        VertexStream {
            stride: stride as u16,
            index_source,
        }
    }
}

/// Stream descriptors built on first request, keyed by stream type.
///
/// Also remembers which type vertex program creation currently targets.
#[derive(Debug, Default)]
pub struct StreamCache {
    streams: HashMap<VertexStreamType, VertexStream>,
    current: Option<VertexStreamType>,
}

impl StreamCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the descriptor for `ty`, building and caching it on first use.
    pub fn get_or_create(&mut self, ty: VertexStreamType) -> VertexStream {
        *self.streams.entry(ty).or_insert_with(|| {
            let stream = ty.descriptor();
            log::debug!(
                "created vertex stream {ty:?}: stride={} index_source={:?}",
                stream.stride,
                stream.index_source
            );
            stream
        })
    }

    /// Makes `ty` the active type, creating its descriptor if needed.
    pub fn set_current(&mut self, ty: VertexStreamType) -> VertexStream {
        let stream = self.get_or_create(ty);
        self.current = Some(ty);
        stream
    }

    /// Active stream type and its descriptor, if one was selected.
    pub fn current(&mut self) -> Option<(VertexStreamType, VertexStream)> {
        let ty = self.current?;
        Some((ty, self.get_or_create(ty)))
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.streams.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vertex_sizes_match_stream_strides() {
        assert_eq!(size_of::<ClearVertex>(), 8);
        assert_eq!(size_of::<BasicVertex>(), 16);
        assert_eq!(VertexStreamType::ClearIndex16.descriptor().stride, 8);
        assert_eq!(VertexStreamType::BasicInstance32.descriptor().stride, 16);
    }

    #[test]
    fn index_sources_follow_type() {
        assert_eq!(VertexStreamType::BasicIndex16.descriptor().index_source, IndexSource::Index16);
        assert_eq!(VertexStreamType::ClearIndex32.descriptor().index_source, IndexSource::Index32);
        assert_eq!(VertexStreamType::ClearInstance16.descriptor().index_source, IndexSource::Instance16);
        assert_eq!(VertexStreamType::BasicInstance32.descriptor().index_source, IndexSource::Instance32);
    }

    #[test]
    fn get_or_create_is_idempotent() {
        let mut cache = StreamCache::new();
        let a = cache.get_or_create(VertexStreamType::BasicIndex16);
        let b = cache.get_or_create(VertexStreamType::BasicIndex16);
        assert_eq!(a, b);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn current_is_unset_until_selected() {
        let mut cache = StreamCache::new();
        assert!(cache.current().is_none());

        cache.set_current(VertexStreamType::ClearIndex16);
        cache.set_current(VertexStreamType::BasicIndex16);
        let (ty, stream) = cache.current().unwrap();
        assert_eq!(ty, VertexStreamType::BasicIndex16);
        assert_eq!(stream.stride, 16);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn every_type_gets_its_own_entry() {
        let mut cache = StreamCache::new();
        for ty in VertexStreamType::ALL {
            cache.get_or_create(ty);
        }
        assert_eq!(cache.len(), VertexStreamType::ALL.len());
    }
}
