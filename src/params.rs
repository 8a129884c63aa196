/// Parameter store
///
/// One remembered feed/pitch value per (units, mode) combination, kept as
/// the text the operator typed and persisted in the panel's EEPROM as
/// fixed-width NUL-padded slots. The in-memory set only changes after the
/// panel acknowledged the write and the read-back matched.

use anyhow::{anyhow, Result};
use std::fmt;
use std::time::Duration;

use crate::decimal::{parse_decimal, Decimal};
use crate::nextion::commands::{from_latin1, latin1};
use crate::nextion::link::{Panel, PanelLink};
use crate::tables::{RatioTableCatalog, TableKind};

pub const SLOT_LEN: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParamSlot {
    ImperialFeed,
    ImperialThread,
    MetricFeed,
    MetricThread,
}

impl ParamSlot {
    pub const ALL: [ParamSlot; 4] = [
        ParamSlot::ImperialFeed,
        ParamSlot::ImperialThread,
        ParamSlot::MetricFeed,
        ParamSlot::MetricThread,
    ];

    pub fn for_mode(metric: bool, thread: bool) -> Self {
        match (metric, thread) {
            (false, false) => ParamSlot::ImperialFeed,
            (false, true) => ParamSlot::ImperialThread,
            (true, false) => ParamSlot::MetricFeed,
            (true, true) => ParamSlot::MetricThread,
        }
    }

    pub fn index(&self) -> usize {
        match self {
            ParamSlot::ImperialFeed => 0,
            ParamSlot::ImperialThread => 1,
            ParamSlot::MetricFeed => 2,
            ParamSlot::MetricThread => 3,
        }
    }

    pub fn kind(&self) -> TableKind {
        match self {
            ParamSlot::ImperialFeed => TableKind { metric: false, thread: false },
            ParamSlot::ImperialThread => TableKind { metric: false, thread: true },
            ParamSlot::MetricFeed => TableKind { metric: true, thread: false },
            ParamSlot::MetricThread => TableKind { metric: true, thread: true },
        }
    }
}

impl fmt::Display for ParamSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.kind(), f)
    }
}

/// Operator text plus its parsed value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParamValue {
    text: String,
    value: Option<Decimal>,
}

impl ParamValue {
    pub fn new(text: &str) -> Self {
        Self {
            text: text.to_string(),
            value: parse_decimal(text),
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// Parsed, nonzero value.
    pub fn value(&self) -> Option<Decimal> {
        self.value.filter(|v| !v.is_zero())
    }

    pub fn is_valid(&self) -> bool {
        self.value().is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParameterSet {
    slots: [ParamValue; 4],
}

impl ParameterSet {
    pub fn from_texts(texts: [&str; 4]) -> Self {
        Self {
            slots: texts.map(ParamValue::new),
        }
    }

    /// Default row label of each table.
    pub fn factory(catalog: &RatioTableCatalog) -> Self {
        let label = |slot: ParamSlot| catalog.table(slot.kind()).default_entry().label.clone();
        let texts = ParamSlot::ALL.map(label);
        Self {
            slots: texts.map(|t| ParamValue::new(&t)),
        }
    }

    pub fn get(&self, slot: ParamSlot) -> &ParamValue {
        &self.slots[slot.index()]
    }

    pub fn set(&mut self, slot: ParamSlot, text: &str) {
        self.slots[slot.index()] = ParamValue::new(text);
    }

    /// True if any slot is unparseable or zero.
    pub fn is_corrupt(&self) -> bool {
        self.slots.iter().any(|v| !v.is_valid())
    }
}

/// Slot text as stored: Latin-1, NUL padded to [`SLOT_LEN`].
pub fn encode_slot(text: &str) -> Result<[u8; SLOT_LEN]> {
    let bytes = latin1(text);
    if bytes.len() > SLOT_LEN {
        return Err(anyhow!("'{}' does not fit in a {} byte slot", text, SLOT_LEN));
    }
    let mut out = [0u8; SLOT_LEN];
    out[..bytes.len()].copy_from_slice(&bytes);
    Ok(out)
}

/// Text up to the first NUL (or erased 0xFF) byte.
pub fn decode_slot(bytes: &[u8]) -> String {
    let end = bytes
        .iter()
        .position(|&b| b == 0 || b == 0xFF)
        .unwrap_or(bytes.len());
    from_latin1(&bytes[..end])
}

#[derive(Debug, Clone)]
pub struct ParameterStore {
    params: ParameterSet,
    factory: ParameterSet,
    base_offset: u32,
    ack_timeout: Duration,
}

impl ParameterStore {
    /// Starts out holding the factory values.
    pub fn new(factory: ParameterSet, base_offset: u32, ack_timeout: Duration) -> Self {
        Self {
            params: factory.clone(),
            factory,
            base_offset,
            ack_timeout,
        }
    }

    pub fn params(&self) -> &ParameterSet {
        &self.params
    }

    pub fn factory(&self) -> &ParameterSet {
        &self.factory
    }

    pub fn get(&self, slot: ParamSlot) -> &ParamValue {
        self.params.get(slot)
    }

    pub fn offset(&self, slot: ParamSlot) -> u32 {
        self.base_offset + (slot.index() * SLOT_LEN) as u32
    }

    /// In-memory only; persisted by the next commit.
    pub fn set_value(&mut self, slot: ParamSlot, text: &str) {
        self.params.set(slot, text);
    }

    /// Load all four slots from the panel, then repair if needed.
    pub fn restore_params<L: PanelLink>(&mut self, panel: &mut Panel<L>) -> Result<()> {
        let mut loaded = self.factory.clone();
        for slot in ParamSlot::ALL {
            let text = match panel.read_eeprom(self.offset(slot), SLOT_LEN, self.ack_timeout)? {
                Some(bytes) => decode_slot(&bytes),
                None => {
                    log::warn!(target: "params", "no reply reading {} slot", slot);
                    String::new()
                }
            };
            log::debug!(target: "params", "restored {} = '{}'", slot, text);
            loaded.set(slot, &text);
        }
        self.params = loaded;
        self.set_params(panel)?;
        Ok(())
    }

    /// Replace a corrupt set with factory values and persist them.
    /// Ok(true) if a repair happened.
    pub fn set_params<L: PanelLink>(&mut self, panel: &mut Panel<L>) -> Result<bool> {
        if !self.params.is_corrupt() {
            return Ok(false);
        }
        log::warn!(target: "params", "stored parameters invalid, restoring factory defaults");
        self.params = self.factory.clone();
        if let Err(e) = self.store_params(panel) {
            log::warn!(target: "params", "failed to persist factory defaults: {:#}", e);
        }
        Ok(true)
    }

    /// Persist every slot as currently held in memory.
    pub fn store_params<L: PanelLink>(&mut self, panel: &mut Panel<L>) -> Result<()> {
        for slot in ParamSlot::ALL {
            let text = self.params.get(slot).text().to_string();
            self.persist(panel, slot, &text)?;
        }
        Ok(())
    }

    /// Persist one operator value. Memory is only updated once the panel
    /// holds exactly the new bytes.
    pub fn commit<L: PanelLink>(&mut self, panel: &mut Panel<L>, slot: ParamSlot, text: &str) -> Result<()> {
        let value = ParamValue::new(text);
        if !value.is_valid() {
            return Err(anyhow!("'{}' is not a usable {} value", text, slot));
        }
        self.persist(panel, slot, text)?;
        self.params.set(slot, text);
        log::info!(target: "params", "committed {} = '{}'", slot, text);
        Ok(())
    }

    fn persist<L: PanelLink>(&self, panel: &mut Panel<L>, slot: ParamSlot, text: &str) -> Result<()> {
        let bytes = encode_slot(text)?;
        let offset = self.offset(slot);
        if !panel.write_eeprom(offset, &bytes, self.ack_timeout)? {
            return Err(anyhow!("panel did not acknowledge {} write at {}", slot, offset));
        }
        let readback = panel
            .read_eeprom(offset, SLOT_LEN, self.ack_timeout)?
            .ok_or_else(|| anyhow!("no read-back for {} slot at {}", slot, offset))?;
        if readback != bytes {
            return Err(anyhow!(
                "read-back mismatch for {} slot: wrote '{}', read '{}'",
                slot, text, decode_slot(&readback)
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nextion::sim::{PanelHandle, SimulatedPanel};
    use crate::tables::{Leadscrew, MachineGeometry};

    fn store() -> ParameterStore {
        let geometry = MachineGeometry {
            encoder_resolution: 4096,
            stepper_resolution: 200,
            microsteps: 8,
            leadscrew: Leadscrew::Tpi(12),
        };
        let catalog = RatioTableCatalog::standard(&geometry).unwrap();
        ParameterStore::new(ParameterSet::factory(&catalog), 0, Duration::from_millis(20))
    }

    fn panel() -> (Panel<SimulatedPanel>, PanelHandle) {
        let (sim, handle) = SimulatedPanel::new();
        (Panel::new(sim), handle)
    }

    #[test]
    fn factory_values_are_default_rows() {
        let s = store();
        assert_eq!(s.get(ParamSlot::ImperialFeed).text(), ".005");
        assert_eq!(s.get(ParamSlot::ImperialThread).text(), "24");
        assert_eq!(s.get(ParamSlot::MetricFeed).text(), ".12");
        assert_eq!(s.get(ParamSlot::MetricThread).text(), ".50");
    }

    #[test]
    fn slot_offsets() {
        let s = ParameterStore::new(store().factory().clone(), 100, Duration::from_millis(1));
        assert_eq!(s.offset(ParamSlot::ImperialFeed), 100);
        assert_eq!(s.offset(ParamSlot::MetricThread), 148);
    }

    #[test]
    fn slot_encoding() {
        let bytes = encode_slot("1.5").unwrap();
        assert_eq!(&bytes[..4], b"1.5\0");
        assert_eq!(decode_slot(&bytes), "1.5");
        assert_eq!(decode_slot(&[0xFF; 16]), "");
        assert!(encode_slot("12345678901234567").is_err());
    }

    #[test]
    fn erased_eeprom_restores_factory_and_persists() {
        let (mut panel, handle) = panel();
        let mut s = store();
        s.restore_params(&mut panel).unwrap();
        assert_eq!(s.params(), s.factory());
        assert_eq!(decode_slot(&handle.eeprom(16, 16)), "24");
    }

    #[test]
    fn one_zero_slot_resets_all() {
        let (mut panel, handle) = panel();
        for (i, text) in ["0.010", "20", "0", "1.25"].iter().enumerate() {
            handle.write_eeprom(i * SLOT_LEN, &encode_slot(text).unwrap());
        }
        let mut s = store();
        s.restore_params(&mut panel).unwrap();
        assert_eq!(s.get(ParamSlot::ImperialThread).text(), "24");
        assert_eq!(s.get(ParamSlot::MetricThread).text(), ".50");
    }

    #[test]
    fn valid_slots_survive_restore() {
        let (mut panel, handle) = panel();
        for (i, text) in ["0.010", "20", ".25", "1.25"].iter().enumerate() {
            handle.write_eeprom(i * SLOT_LEN, &encode_slot(text).unwrap());
        }
        let mut s = store();
        s.restore_params(&mut panel).unwrap();
        assert_eq!(s.get(ParamSlot::ImperialFeed).text(), "0.010");
        assert_eq!(s.get(ParamSlot::MetricThread).text(), "1.25");
        // nothing rewritten
        assert!(!handle.received().iter().any(|l| l.starts_with("wept")));
    }

    #[test]
    fn commit_persists_and_updates() {
        let (mut panel, handle) = panel();
        let mut s = store();
        s.commit(&mut panel, ParamSlot::ImperialThread, "1.5").unwrap();
        assert_eq!(s.get(ParamSlot::ImperialThread).text(), "1.5");
        assert_eq!(decode_slot(&handle.eeprom(16, 16)), "1.5");
    }

    #[test]
    fn failed_commit_keeps_previous_value() {
        let (mut panel, handle) = panel();
        let mut s = store();
        handle.set_ack_writes(false);
        assert!(s.commit(&mut panel, ParamSlot::MetricFeed, ".3").is_err());
        assert_eq!(s.get(ParamSlot::MetricFeed).text(), ".12");

        handle.set_ack_writes(true);
        handle.set_corrupt_writes(true);
        assert!(s.commit(&mut panel, ParamSlot::MetricFeed, ".3").is_err());
        assert_eq!(s.get(ParamSlot::MetricFeed).text(), ".12");
    }

    #[test]
    fn zero_is_never_committed() {
        let (mut panel, handle) = panel();
        let mut s = store();
        assert!(s.commit(&mut panel, ParamSlot::ImperialFeed, "0.0").is_err());
        assert!(handle.received().is_empty());
    }
}
