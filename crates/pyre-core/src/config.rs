//! Configuration parameters recognised by the core.
//!
//! A plain value struct threaded through the engine; there is no global
//! mutable state. Defaults mirror the classic server defaults.

/// Tuning knobs for the data types and reclamation machinery.
#[derive(Debug, Clone)]
pub struct CoreConfig {
    /// Quicklist per-node size policy. Positive values bound the element
    /// count per node; negative values in -1..=-5 select a byte budget
    /// from the fixed 4 KB..64 KB class table.
    pub list_fill: i32,

    /// Quicklist compression depth: this many nodes at each end stay raw,
    /// interior nodes are compressed. 0 disables compression.
    pub list_compress_depth: usize,

    /// Hash packed-encoding promotion threshold by pair count.
    pub hash_max_pack_entries: usize,

    /// Hash packed-encoding promotion threshold by field/value byte width.
    pub hash_max_pack_value: usize,

    /// Grow the dict past the resize-disabled guard once used/size exceeds
    /// this ratio (copy-on-write fork friendliness escape hatch).
    pub force_resize_ratio: usize,

    /// Values whose free effort exceeds this are released on the
    /// background reclaim thread instead of inline.
    pub lazyfree_threshold: usize,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            list_fill: -2,
            list_compress_depth: 0,
            hash_max_pack_entries: 128,
            hash_max_pack_value: 64,
            force_resize_ratio: 5,
            lazyfree_threshold: 64,
        }
    }
}
