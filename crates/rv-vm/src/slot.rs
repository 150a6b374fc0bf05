//! Slot/card fabric: fixed chassis positions, each optionally holding a card
//! bound by a driver providing init/shutdown/NIO-binding hooks.

use std::sync::Arc;

use rv_nio::NioEndpoint;

#[derive(Debug, thiserror::Error)]
pub enum SlotError {
    #[error("slot index {0} out of range (max {1})")]
    OutOfRange(usize, usize),
    #[error("slot {0} is already populated")]
    AlreadyPopulated(usize),
    #[error("slot {0} has no card")]
    Empty(usize),
    #[error("card {card} has no port {port}")]
    NoSuchPort { card: String, port: u32 },
}

/// Hooks a card driver implements; `init`/`shutdown` run exactly once across
/// the card's lifetime, `set_nio`/`unset_nio` may run any number of times.
pub trait CardDriver: Send {
    fn name(&self) -> &str;
    fn init(&mut self) {}
    fn shutdown(&mut self) {}
    fn set_nio(&mut self, port_id: u32, nio: Arc<NioEndpoint>) -> Result<(), SlotError>;
    fn unset_nio(&mut self, port_id: u32) -> Result<(), SlotError>;
}

struct PortBinding {
    orig_port_id: u32,
    port_id: u32,
}

pub struct Card {
    driver: Box<dyn CardDriver>,
    bindings: Vec<PortBinding>,
}

impl Card {
    pub fn driver_name(&self) -> &str {
        self.driver.name()
    }

    pub fn bind_nio(&mut self, orig_port_id: u32, port_id: u32, nio: Arc<NioEndpoint>) -> Result<(), SlotError> {
        self.driver.set_nio(port_id, nio)?;
        self.bindings.retain(|b| b.orig_port_id != orig_port_id);
        self.bindings.push(PortBinding { orig_port_id, port_id });
        Ok(())
    }

    pub fn unbind_nio(&mut self, orig_port_id: u32) -> Result<(), SlotError> {
        let idx = self
            .bindings
            .iter()
            .position(|b| b.orig_port_id == orig_port_id)
            .ok_or_else(|| SlotError::NoSuchPort {
                card: self.driver.name().to_string(),
                port: orig_port_id,
            })?;
        let binding = self.bindings.remove(idx);
        self.driver.unset_nio(binding.port_id)
    }
}

/// A fixed-size table of slots. A populated slot always has an initialized
/// driver (or no card at all) — cards are only ever created through
/// [`SlotFabric::insert_card`], never by direct construction.
pub struct SlotFabric {
    slots: Vec<Option<Card>>,
}

impl SlotFabric {
    pub fn new(slot_count: usize) -> Self {
        let mut slots = Vec::with_capacity(slot_count);
        slots.resize_with(slot_count, || None);
        Self { slots }
    }

    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    pub fn insert_card(&mut self, slot: usize, mut driver: Box<dyn CardDriver>) -> Result<(), SlotError> {
        self.check_range(slot)?;
        if self.slots[slot].is_some() {
            return Err(SlotError::AlreadyPopulated(slot));
        }
        driver.init();
        self.slots[slot] = Some(Card {
            driver,
            bindings: Vec::new(),
        });
        tracing::debug!(slot, "slot: card inserted");
        Ok(())
    }

    pub fn remove_card(&mut self, slot: usize) -> Result<(), SlotError> {
        self.check_range(slot)?;
        let mut card = self.slots[slot].take().ok_or(SlotError::Empty(slot))?;
        card.driver.shutdown();
        tracing::debug!(slot, "slot: card removed");
        Ok(())
    }

    pub fn card_mut(&mut self, slot: usize) -> Result<&mut Card, SlotError> {
        self.check_range(slot)?;
        self.slots[slot].as_mut().ok_or(SlotError::Empty(slot))
    }

    fn check_range(&self, slot: usize) -> Result<(), SlotError> {
        if slot >= self.slots.len() {
            return Err(SlotError::OutOfRange(slot, self.slots.len()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeCard {
        nios: std::collections::HashMap<u32, Arc<NioEndpoint>>,
    }
    impl CardDriver for FakeCard {
        fn name(&self) -> &str {
            "fake-nm"
        }
        fn set_nio(&mut self, port_id: u32, nio: Arc<NioEndpoint>) -> Result<(), SlotError> {
            self.nios.insert(port_id, nio);
            Ok(())
        }
        fn unset_nio(&mut self, port_id: u32) -> Result<(), SlotError> {
            self.nios.remove(&port_id);
            Ok(())
        }
    }

    #[test]
    fn insert_then_duplicate_is_rejected() {
        let mut fabric = SlotFabric::new(4);
        fabric
            .insert_card(0, Box::new(FakeCard { nios: Default::default() }))
            .unwrap();
        let err = fabric
            .insert_card(0, Box::new(FakeCard { nios: Default::default() }))
            .unwrap_err();
        assert!(matches!(err, SlotError::AlreadyPopulated(0)));
    }

    #[test]
    fn out_of_range_slot_is_rejected() {
        let mut fabric = SlotFabric::new(2);
        let err = fabric
            .insert_card(5, Box::new(FakeCard { nios: Default::default() }))
            .unwrap_err();
        assert!(matches!(err, SlotError::OutOfRange(5, 2)));
    }

    #[test]
    fn bind_and_unbind_nio_round_trips() {
        use rv_nio::NullTransport;
        let mut fabric = SlotFabric::new(4);
        fabric
            .insert_card(1, Box::new(FakeCard { nios: Default::default() }))
            .unwrap();
        let nio = Arc::new(NioEndpoint::new("n0", Box::new(NullTransport)));
        let card = fabric.card_mut(1).unwrap();
        card.bind_nio(0, 0, nio).unwrap();
        card.unbind_nio(0).unwrap();
        assert!(matches!(card.unbind_nio(0), Err(SlotError::NoSuchPort { .. })));
    }
}
