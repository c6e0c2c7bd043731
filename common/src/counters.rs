use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistentCounters {
    pub total: u32,
    pub batch: u32,
}

impl PersistentCounters {
    pub fn record_detection(&mut self) {
        self.total = self.total.saturating_add(1);
        self.batch = self.batch.saturating_add(1);
    }

    pub fn close_batch(&mut self) {
        self.batch = 0;
    }

    pub fn has_pending(&self) -> bool {
        self.batch > 0
    }
}

const RETAINED_MAGIC: u32 = 0x5452_4331;

/// Layout written to the RTC slow-memory region.
///
/// The magic and check words reject cold-boot contents and snapshots written
/// by a firmware with a different layout; either loads as zero counters.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetainedCounters {
    magic: u32,
    total: u32,
    batch: u32,
    check: u32,
}

impl RetainedCounters {
    pub const EMPTY: Self = Self {
        magic: 0,
        total: 0,
        batch: 0,
        check: 0,
    };

    pub fn seal(counters: PersistentCounters) -> Self {
        Self {
            magic: RETAINED_MAGIC,
            total: counters.total,
            batch: counters.batch,
            check: check_word(RETAINED_MAGIC, counters.total, counters.batch),
        }
    }

    pub fn is_valid(&self) -> bool {
        self.magic == RETAINED_MAGIC && self.check == check_word(self.magic, self.total, self.batch)
    }

    pub fn load(&self) -> PersistentCounters {
        if self.is_valid() {
            PersistentCounters {
                total: self.total,
                batch: self.batch,
            }
        } else {
            PersistentCounters::default()
        }
    }
}

fn check_word(magic: u32, total: u32, batch: u32) -> u32 {
    !(magic ^ total ^ batch.rotate_left(16))
}
