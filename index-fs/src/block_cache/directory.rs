//! 缓存目录：扇区到槽位的映射、时钟指针、驱逐账本与预读队列。
//!
//! 目录只做 O(1) 级别的记账，整个目录由块缓存的全局锁保护，
//! 持锁期间从不进行设备读写。

use alloc::collections::{BTreeMap, BTreeSet, VecDeque};
use alloc::vec;
use alloc::vec::Vec;

/// 槽位的元信息
#[derive(Debug, Default, Clone, Copy)]
struct Slot {
    /// 槽位当前缓存的扇区，空表示空闲槽位
    sector: Option<usize>,
    /// 正在使用此槽位的操作数，大于零时不可驱逐
    pins: usize,
    /// 时钟算法的访问位
    accessed: bool,
}

#[derive(Debug, PartialEq, Eq)]
pub(super) enum Lookup {
    /// 扇区已缓存，槽位已被钉住
    Hit(usize),
    /// 扇区正在被驱逐，须等驱逐结束再取
    Evicting,
    /// 所有槽位都被钉住
    Exhausted,
    /// 为扇区预留了槽位并钉住；`victim` 是被挤出去的旧扇区，
    /// 调用者负责写回它并调用 [`Directory::finish_eviction`]
    Reserved { slot: usize, victim: Option<usize> },
}

#[derive(Debug)]
pub(super) struct Directory {
    slots: Vec<Slot>,
    /// 扇区 -> 槽位，保证同一扇区至多缓存一份
    resident: BTreeMap<usize, usize>,
    /// 时钟指针
    hand: usize,
    /// 驱逐账本：旧内容正在写回的扇区
    evicting: BTreeSet<usize>,
    read_ahead: VecDeque<usize>,
    read_ahead_limit: usize,
}

impl Directory {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "block cache needs at least one slot");
        Self {
            slots: vec![Slot::default(); capacity],
            resident: BTreeMap::new(),
            hand: 0,
            evicting: BTreeSet::new(),
            read_ahead: VecDeque::new(),
            read_ahead_limit: capacity.div_ceil(2),
        }
    }

    /// 查找扇区；未缓存则预留槽位。
    /// 命中与预留都会钉住槽位并置访问位。
    pub fn lookup(&mut self, sector: usize) -> Lookup {
        if let Some(&slot) = self.resident.get(&sector) {
            let entry = &mut self.slots[slot];
            entry.pins += 1;
            entry.accessed = true;
            return Lookup::Hit(slot);
        }

        if self.evicting.contains(&sector) {
            return Lookup::Evicting;
        }

        let Some(slot) = self.free_slot().or_else(|| self.victim()) else {
            return Lookup::Exhausted;
        };

        let entry = &mut self.slots[slot];
        let victim = entry.sector.replace(sector);
        entry.pins = 1;
        entry.accessed = true;

        if let Some(victim) = victim {
            self.resident.remove(&victim);
            self.evicting.insert(victim);
        }
        self.resident.insert(sector, slot);

        Lookup::Reserved { slot, victim }
    }

    #[inline]
    pub fn finish_eviction(&mut self, sector: usize) {
        let removed = self.evicting.remove(&sector);
        debug_assert!(removed);
    }

    /// 为写回钉住一个已缓存的槽位，不改变访问位
    pub fn pin_resident(&mut self, slot: usize) -> Option<usize> {
        let entry = &mut self.slots[slot];
        let sector = entry.sector?;
        entry.pins += 1;
        Some(sector)
    }

    #[inline]
    pub fn unpin(&mut self, slot: usize) {
        let entry = &mut self.slots[slot];
        assert!(entry.pins > 0, "unpin a free slot");
        entry.pins -= 1;
    }

    #[inline]
    pub fn is_resident(&self, sector: usize) -> bool {
        self.resident.contains_key(&sector)
    }

    /// 预读请求入队，已缓存、已排队或队列已满时忽略
    pub fn queue_read_ahead(&mut self, sector: usize) -> bool {
        if self.is_resident(sector)
            || self.read_ahead.len() >= self.read_ahead_limit
            || self.read_ahead.contains(&sector)
        {
            return false;
        }

        self.read_ahead.push_back(sector);
        true
    }

    #[inline]
    pub fn next_read_ahead(&mut self) -> Option<usize> {
        self.read_ahead.pop_front()
    }

    #[inline]
    pub fn pending_read_ahead(&self) -> usize {
        self.read_ahead.len()
    }
}

impl Directory {
    fn free_slot(&self) -> Option<usize> {
        self.slots.iter().position(|entry| entry.sector.is_none())
    }

    // 块缓存调度策略：时钟（二次机会）算法
    fn victim(&mut self) -> Option<usize> {
        // 第一圈最多清掉所有访问位，第二圈必能选中未钉住的槽位
        for _ in 0..2 * self.slots.len() {
            let slot = self.hand;
            self.hand = (self.hand + 1) % self.slots.len();

            let entry = &mut self.slots[slot];
            if entry.pins > 0 {
                continue;
            }
            if entry.accessed {
                entry.accessed = false;
                continue;
            }

            return Some(slot);
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 取用并立即放开，模拟一次完整的读写
    fn touch(directory: &mut Directory, sector: usize) -> Lookup {
        let lookup = directory.lookup(sector);
        match lookup {
            Lookup::Hit(slot) => directory.unpin(slot),
            Lookup::Reserved { slot, victim } => {
                if let Some(victim) = victim {
                    directory.finish_eviction(victim);
                }
                directory.unpin(slot);
            }
            _ => {}
        }
        lookup
    }

    #[test]
    fn free_slots_are_used_first() {
        let mut directory = Directory::new(3);
        for (slot, sector) in (10..13).enumerate() {
            assert_eq!(
                touch(&mut directory, sector),
                Lookup::Reserved { slot, victim: None }
            );
        }
        assert_eq!(touch(&mut directory, 11), Lookup::Hit(1));
    }

    #[test]
    fn eviction_follows_clock_order() {
        let mut directory = Directory::new(4);
        for sector in 10..14 {
            touch(&mut directory, sector);
        }

        // 所有访问位都被置上，第一圈全部清除后回到槽位0
        assert_eq!(
            touch(&mut directory, 14),
            Lookup::Reserved { slot: 0, victim: Some(10) }
        );
        assert_eq!(
            touch(&mut directory, 15),
            Lookup::Reserved { slot: 1, victim: Some(11) }
        );

        // 再次访问12，它获得第二次机会，13被选中
        touch(&mut directory, 12);
        assert_eq!(
            touch(&mut directory, 16),
            Lookup::Reserved { slot: 3, victim: Some(13) }
        );
    }

    #[test]
    fn pinned_slot_is_never_chosen() {
        let mut directory = Directory::new(2);
        // 槽位0一直被钉住
        assert_eq!(
            directory.lookup(1),
            Lookup::Reserved { slot: 0, victim: None }
        );
        touch(&mut directory, 2);

        for sector in 3..10 {
            assert_eq!(
                touch(&mut directory, sector),
                Lookup::Reserved { slot: 1, victim: Some(sector - 1) }
            );
        }
        assert!(directory.is_resident(1));
    }

    #[test]
    fn exhausted_when_every_slot_is_pinned() {
        let mut directory = Directory::new(2);
        directory.lookup(1);
        directory.lookup(2);
        assert_eq!(directory.lookup(3), Lookup::Exhausted);

        directory.unpin(0);
        assert_eq!(
            directory.lookup(3),
            Lookup::Reserved { slot: 0, victim: Some(1) }
        );
    }

    #[test]
    fn sector_under_eviction_must_wait() {
        let mut directory = Directory::new(1);
        touch(&mut directory, 1);

        let Lookup::Reserved { slot, victim } = directory.lookup(2) else {
            panic!("slot 0 should be evicted");
        };
        assert_eq!(victim, Some(1));
        assert!(!directory.is_resident(1));
        assert_eq!(directory.lookup(1), Lookup::Evicting);

        directory.finish_eviction(1);
        directory.unpin(slot);
        assert_eq!(
            directory.lookup(1),
            Lookup::Reserved { slot: 0, victim: Some(2) }
        );
    }

    #[test]
    fn flush_pins_without_touching_access_bit() {
        let mut directory = Directory::new(2);
        touch(&mut directory, 1);
        touch(&mut directory, 2);
        // 两个访问位都被时钟清掉，槽位0被选中，指针停在槽位1
        touch(&mut directory, 3);

        // 写回时的钉住不算访问，放开后槽位1立即可被驱逐

        assert_eq!(directory.pin_resident(1), Some(2));
        directory.unpin(1);
        assert_eq!(
            directory.lookup(4),
            Lookup::Reserved { slot: 1, victim: Some(2) }
        );
    }

    #[test]
    fn read_ahead_queue_is_deduplicated() {
        let mut directory = Directory::new(4);
        touch(&mut directory, 1);

        assert!(!directory.queue_read_ahead(1));
        assert!(directory.queue_read_ahead(2));
        assert!(!directory.queue_read_ahead(2));
        assert!(directory.queue_read_ahead(3));
        // 队列上限为容量的一半
        assert!(!directory.queue_read_ahead(4));

        assert_eq!(directory.pending_read_ahead(), 2);
        assert_eq!(directory.next_read_ahead(), Some(2));
        assert_eq!(directory.next_read_ahead(), Some(3));
        assert_eq!(directory.next_read_ahead(), None);
    }
}
