//! 状态表：带时间戳的环形历史
//!
//! 单写者（组件线程，持有 [`StateTableWriter`]）每个周期调用一次
//! `advance()` 发布一行；任意数量的读者（[`StateTableReader`]）无锁读取。
//!
//! # 结构
//!
//! - 每个槽位是一个 `ArcSwapOption<Row>`，发布即原子替换，读者拿到的是完整的一行
//! - `published` 记录已发布的行数，最新行的 tick 为 `published - 1`
//! - 读者通过比较槽位中行的 tick 判断历史是否已被覆盖
//!
//! 列集合在第一次 `advance()` 后冻结。

use crate::error::StateTableError;
use arc_swap::{ArcSwap, ArcSwapOption};
use armature_protocol::{Value, ValueType};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tracing::warn;

/// 列定义
#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub name: String,
    pub value_type: ValueType,
}

/// 已发布的一行
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    pub tick: u64,
    pub timestamp_us: u64,
    pub values: Vec<Value>,
}

const READ_RETRIES: usize = 3;

struct TableShared {
    capacity: usize,
    columns: ArcSwap<Vec<Column>>,
    slots: Box<[ArcSwapOption<Row>]>,
    published: AtomicU64,
    frozen: AtomicBool,
}

impl TableShared {
    fn column_index(&self, name: &str) -> Result<usize, StateTableError> {
        self.columns
            .load()
            .iter()
            .position(|c| c.name == name)
            .ok_or_else(|| StateTableError::NoSuchColumn(name.to_string()))
    }
}

/// 创建状态表，返回写者
///
/// 容量至少为 1。
pub fn state_table(capacity: usize) -> StateTableWriter {
    StateTableWriter::new(capacity)
}

/// 状态表写者
pub struct StateTableWriter {
    shared: Arc<TableShared>,
    staged: Vec<Value>,
    last_timestamp_us: u64,
}

impl StateTableWriter {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let slots = (0..capacity)
            .map(|_| ArcSwapOption::empty())
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Self {
            shared: Arc::new(TableShared {
                capacity,
                columns: ArcSwap::from_pointee(Vec::new()),
                slots,
                published: AtomicU64::new(0),
                frozen: AtomicBool::new(false),
            }),
            staged: Vec::new(),
            last_timestamp_us: 0,
        }
    }

    pub fn reader(&self) -> StateTableReader {
        StateTableReader {
            shared: self.shared.clone(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    pub fn is_frozen(&self) -> bool {
        self.shared.frozen.load(Ordering::Acquire)
    }

    /// 添加列（`exemplar` 同时给出类型和初始值）
    ///
    /// 第一次 `advance()` 之后或列名重复时返回 `false`。
    pub fn add_column(&mut self, name: impl Into<String>, exemplar: Value) -> bool {
        if self.is_frozen() {
            return false;
        }
        let name = name.into();
        let current = self.shared.columns.load_full();
        if current.iter().any(|c| c.name == name) {
            return false;
        }

        let mut next = Vec::clone(&current);
        next.push(Column {
            name,
            value_type: exemplar.value_type(),
        });
        self.shared.columns.store(Arc::new(next));
        self.staged.push(exemplar);
        true
    }

    /// 写入下一行某列的值（类型检查）
    ///
    /// 未写入的列沿用上一行的值。
    pub fn stage(&mut self, name: &str, value: Value) -> Result<(), StateTableError> {
        let index = self.shared.column_index(name)?;
        let expected = self.shared.columns.load()[index].value_type;
        if value.value_type() != expected {
            return Err(StateTableError::TypeMismatch {
                column: name.to_string(),
                expected,
                actual: value.value_type(),
            });
        }
        self.staged[index] = value;
        Ok(())
    }

    /// 发布暂存行，覆盖最旧的一行，返回新行的 tick
    ///
    /// 时间戳小于上一行时被钳制为上一行的时间戳。
    pub fn advance(&mut self, timestamp_us: u64) -> u64 {
        self.shared.frozen.store(true, Ordering::Release);

        let timestamp_us = if timestamp_us < self.last_timestamp_us {
            warn!(
                "State table timestamp went backwards ({} < {}), clamping",
                timestamp_us, self.last_timestamp_us
            );
            self.last_timestamp_us
        } else {
            timestamp_us
        };
        self.last_timestamp_us = timestamp_us;

        let tick = self.shared.published.load(Ordering::Relaxed);
        let slot = (tick % self.shared.capacity as u64) as usize;
        self.shared.slots[slot].store(Some(Arc::new(Row {
            tick,
            timestamp_us,
            values: self.staged.clone(),
        })));
        // Release：读者看到新的计数时一定能看到槽位中的新行
        self.shared.published.store(tick + 1, Ordering::Release);
        tick
    }
}

/// 状态表读者（可克隆，无锁）
#[derive(Clone)]
pub struct StateTableReader {
    shared: Arc<TableShared>,
}

impl StateTableReader {
    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    pub fn columns(&self) -> Vec<Column> {
        Vec::clone(&self.shared.columns.load())
    }

    /// 已发布的行数
    pub fn published(&self) -> u64 {
        self.shared.published.load(Ordering::Acquire)
    }

    /// 读取最新值及其时间戳
    pub fn read_latest(&self, name: &str) -> Result<(Value, u64), StateTableError> {
        self.read_at(name, 0)
    }

    /// 读取历史值：`history_index = 0` 为最新行
    pub fn read_at(&self, name: &str, history_index: usize) -> Result<(Value, u64), StateTableError> {
        let column = self.shared.column_index(name)?;
        let row = self.row_at(history_index)?;
        let value = row
            .values
            .get(column)
            .cloned()
            .ok_or_else(|| StateTableError::NoSuchColumn(name.to_string()))?;
        Ok((value, row.timestamp_us))
    }

    /// 读取完整的历史行
    pub fn row_at(&self, history_index: usize) -> Result<Arc<Row>, StateTableError> {
        let capacity = self.shared.capacity;
        if history_index >= capacity {
            return Err(StateTableError::Expired {
                index: history_index,
                capacity,
            });
        }

        // 读取期间写者可能已覆盖目标槽位；最新行重读计数后重试
        for _ in 0..READ_RETRIES {
            let published = self.published();
            if published == 0 || history_index as u64 >= published {
                return Err(StateTableError::NoData);
            }

            let tick = published - 1 - history_index as u64;
            let slot = (tick % capacity as u64) as usize;
            match self.shared.slots[slot].load_full() {
                Some(row) if row.tick == tick => return Ok(row),
                _ if history_index == 0 => continue,
                _ => break,
            }
        }

        Err(StateTableError::Expired {
            index: history_index,
            capacity,
        })
    }

    /// 最新行的时间戳
    pub fn latest_timestamp(&self) -> Option<u64> {
        self.row_at(0).ok().map(|row| row.timestamp_us)
    }
}

impl std::fmt::Debug for StateTableReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateTableReader")
            .field("capacity", &self.shared.capacity)
            .field("published", &self.published())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_add_column_rules() {
        let mut table = state_table(4);
        assert!(table.add_column("position", Value::Double(0.0)));
        assert!(!table.add_column("position", Value::Double(0.0)));
        table.advance(1);
        assert!(table.is_frozen());
        assert!(!table.add_column("velocity", Value::Double(0.0)));
    }

    #[test]
    fn test_no_data_before_first_advance() {
        let mut table = state_table(4);
        table.add_column("position", Value::Double(0.0));
        let reader = table.reader();
        assert_eq!(reader.read_latest("position"), Err(StateTableError::NoData));
        assert!(matches!(
            reader.read_latest("missing"),
            Err(StateTableError::NoSuchColumn(_))
        ));
    }

    #[test]
    fn test_stage_and_read() {
        let mut table = state_table(4);
        table.add_column("position", Value::Double(0.0));
        table.add_column("count", Value::Int(0));
        let reader = table.reader();

        table.stage("position", Value::Double(1.5)).unwrap();
        table.advance(100);
        table.stage("count", Value::Int(3)).unwrap();
        table.advance(200);

        assert_eq!(reader.read_latest("position").unwrap(), (Value::Double(1.5), 200));
        assert_eq!(reader.read_latest("count").unwrap(), (Value::Int(3), 200));
        assert_eq!(reader.read_at("count", 1).unwrap(), (Value::Int(0), 100));
        assert_eq!(reader.read_at("count", 2), Err(StateTableError::NoData));
    }

    #[test]
    fn test_stage_type_mismatch() {
        let mut table = state_table(2);
        table.add_column("position", Value::Double(0.0));
        assert!(matches!(
            table.stage("position", Value::Int(1)),
            Err(StateTableError::TypeMismatch { .. })
        ));
        assert!(matches!(
            table.stage("missing", Value::Int(1)),
            Err(StateTableError::NoSuchColumn(_))
        ));
    }

    #[test]
    fn test_history_expires() {
        let mut table = state_table(3);
        table.add_column("tick", Value::UInt(0));
        let reader = table.reader();

        for i in 0..5u64 {
            table.stage("tick", Value::UInt(i)).unwrap();
            table.advance(i * 10);
        }

        assert_eq!(reader.read_at("tick", 0).unwrap().0, Value::UInt(4));
        assert_eq!(reader.read_at("tick", 2).unwrap().0, Value::UInt(2));
        assert!(matches!(
            reader.read_at("tick", 3),
            Err(StateTableError::Expired { index: 3, capacity: 3 })
        ));
    }

    #[test]
    fn test_timestamp_clamped() {
        let mut table = state_table(4);
        table.add_column("x", Value::Int(0));
        let reader = table.reader();
        table.advance(500);
        table.advance(100);
        assert_eq!(reader.latest_timestamp(), Some(500));
    }

    #[test]
    fn test_concurrent_reader() {
        let mut table = state_table(16);
        table.add_column("counter", Value::UInt(0));
        let reader = table.reader();

        let handle = std::thread::spawn(move || {
            let mut last = 0u64;
            for _ in 0..1000 {
                if let Ok((Value::UInt(v), ts)) = reader.read_latest("counter") {
                    assert!(v >= last);
                    assert_eq!(ts, v);
                    last = v;
                }
            }
        });

        for i in 1..=1000u64 {
            table.stage("counter", Value::UInt(i)).unwrap();
            table.advance(i);
        }
        handle.join().unwrap();
    }

    proptest! {
        /// 容量 C 的表在 C+k 次 advance 后：
        /// index >= C 返回 Expired，最新时间戳为最后一次 advance 且单调不减
        #[test]
        fn state_table_expiry(capacity in 1usize..16, extra in 0usize..16, jitter in proptest::collection::vec(0u64..50, 32)) {
            let mut table = state_table(capacity);
            table.add_column("v", Value::UInt(0));
            let reader = table.reader();

            let mut ts = 1000u64;
            let mut last_seen = 0u64;
            for (i, j) in jitter.iter().cycle().take(capacity + extra).enumerate() {
                // 偶数步时间前进，奇数步尝试回退
                ts = if i % 2 == 0 { ts + j } else { ts.saturating_sub(*j) };
                table.stage("v", Value::UInt(i as u64)).unwrap();
                table.advance(ts);
                let latest = reader.latest_timestamp().unwrap();
                prop_assert!(latest >= last_seen);
                last_seen = latest;
            }

            let expired = matches!(
                reader.read_at("v", capacity),
                Err(StateTableError::Expired { .. })
            );
            prop_assert!(expired);
            let (value, _) = reader.read_latest("v").unwrap();
            prop_assert_eq!(value, Value::UInt((capacity + extra - 1) as u64));
        }
    }
}
