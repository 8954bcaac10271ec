use parking_lot::Mutex;

/// A class based slab allocation memory pool.
///
/// Materialises `N` size classes where the `k`-th class size grows by
/// `min_size * (k/factor*2 + 1)` over the previous one, clamped at `max_size`. A direct
/// `size -> class_index` lookup table gives `O(1)` class selection for any `size <= max_size`.
///
/// Grounded on the teacher's sync.Pool based slab allocator (bufreader/pool.go in the original
/// source this spec distills from) generalised from a `sync.Pool` per class to an explicit
/// freelist guarded by a single mutex, since `parking_lot::Mutex` is already the lock of choice
/// elsewhere in this crate.
pub struct SlabPool {
    classes: Vec<Mutex<Vec<Vec<u8>>>>,
    class_sizes: Vec<usize>,
    min_size: usize,
    max_size: usize,
    size_lookup: Vec<u32>,
}

#[derive(Debug)]
pub struct InvalidSize;

impl SlabPool {
    pub fn new(min_size: usize, max_size: usize, factor: usize) -> Result<SlabPool, InvalidSize> {
        if min_size == 0 || max_size < min_size || factor == 0 {
            return Err(InvalidSize);
        }

        let mut class_sizes = Vec::new();
        let mut chunk_size = min_size;
        let mut k = 0usize;
        loop {
            let size = chunk_size.min(max_size);
            class_sizes.push(size);
            if size >= max_size {
                break;
            }
            k += 1;
            chunk_size += min_size * ((k - 1) / factor * 2 + 1);
        }

        let mut size_lookup = vec![0u32; max_size + 1];
        let mut start = 0usize;
        for (k, &size) in class_sizes.iter().enumerate() {
            for slot in &mut size_lookup[start..=size] {
                *slot = k as u32;
            }
            start = size + 1;
        }

        let classes = class_sizes.iter().map(|_| Mutex::new(Vec::new())).collect();

        Ok(SlabPool {
            classes,
            class_sizes,
            min_size,
            max_size,
            size_lookup,
        })
    }

    #[inline]
    pub fn min_size(&self) -> usize {
        self.min_size
    }

    #[inline]
    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// Returns the actual class size a request of `size` bytes would be served from.
    #[inline]
    pub fn class_size(&self, size: usize) -> usize {
        if size == 0 || size > self.max_size {
            return size;
        }
        self.class_sizes[self.size_lookup[size] as usize]
    }

    /// Allocates a buffer of length exactly `n`. Capacity is the owning class's size when
    /// `n <= max_size`; for larger requests the allocation is not pooled.
    pub fn alloc(&self, n: usize) -> Vec<u8> {
        if n == 0 {
            return Vec::new();
        }

        if n > self.max_size {
            return vec![0u8; n];
        }

        let class_index = self.size_lookup[n] as usize;
        let size = self.class_sizes[class_index];

        let mut buf = {
            let mut freelist = self.classes[class_index].lock();
            freelist.pop().unwrap_or_else(|| vec![0u8; size])
        };
        buf.resize(size, 0);
        buf.truncate(n);
        buf
    }

    /// Returns a buffer previously obtained from `alloc` to its class freelist.
    pub fn free(&self, mut buf: Vec<u8>) {
        if buf.is_empty() {
            return;
        }

        let cap = buf.capacity();
        if cap > self.max_size {
            return;
        }

        let class_index = self.size_lookup[cap.min(self.max_size)] as usize;
        let size = self.class_sizes[class_index];
        if cap != size {
            // Capacity doesn't line up with a class boundary (e.g. a buffer grown manually);
            // just drop it rather than corrupt the freelist bookkeeping.
            return;
        }

        buf.clear();
        buf.resize(size, 0);
        self.classes[class_index].lock().push(buf);
    }
}
