//! Item ownership and lending
//!
//! An item belongs to exactly one chunk but may poke into neighbouring
//! chunks. Those neighbours borrow it so traversal of either chunk finds it.
//! Loans only exist between bound chunks: they are made when either side
//! binds and withdrawn when either side unbinds.

use glam::Vec3;

use crate::chunk::Chunk;
use crate::contract;
use crate::handle::ChunkId;
use crate::item::ChunkItemPtr;
use crate::math::BoundingBox;
use crate::space::ChunkSpace;

/// An item wholly inside its own interior chunk never needs lending
fn lending_needed(owner: &Chunk, bounds: &BoundingBox) -> bool {
    owner.is_outside_chunk() || !owner.bounding_box().contains_box(bounds)
}

impl ChunkSpace {
    /// Add a static item, lending it out if the chunk is bound
    pub fn add_static_item(&mut self, id: ChunkId, item: ChunkItemPtr) -> bool {
        let Some(chunk) = self.chunk_mut(id) else {
            return false;
        };
        if !chunk.add_static_item(item.clone()) {
            return false;
        }
        if chunk.is_bound() && item.wants_lending() {
            self.lend_by_bounding_box(id, &item, item.bounding_box());
        }
        true
    }

    /// Remove a static item and withdraw its loans
    pub fn del_static_item(&mut self, id: ChunkId, item: &ChunkItemPtr) -> bool {
        let removed = self.chunk_mut(id).is_some_and(|c| c.del_static_item(item));
        if removed {
            self.withdraw_item_loans(id, item);
        }
        removed
    }

    /// Add a dynamic item, lending it out if the chunk is bound
    pub fn add_dynamic_item(&mut self, id: ChunkId, item: ChunkItemPtr) -> bool {
        let Some(chunk) = self.chunk_mut(id) else {
            return false;
        };
        if !chunk.add_dynamic_item(item.clone()) {
            return false;
        }
        if chunk.is_bound() && item.wants_lending() {
            self.lend_by_bounding_box(id, &item, item.bounding_box());
        }
        true
    }

    /// Remove a dynamic item and withdraw its loans
    pub fn del_dynamic_item(&mut self, id: ChunkId, item: &ChunkItemPtr) -> bool {
        let removed = self.chunk_mut(id).is_some_and(|c| c.del_dynamic_item(item));
        if removed {
            self.withdraw_item_loans(id, item);
        }
        removed
    }

    /// A dynamic item moved to `new_position`. Re-lends it around its new
    /// bounds, moving it to whichever bound chunk now contains it. Returns
    /// the item's new home, or `None` if no bound chunk contains it.
    pub fn mod_dynamic_item(
        &mut self,
        id: ChunkId,
        item: &ChunkItemPtr,
        new_position: Vec3,
        diameter: f32,
    ) -> Option<ChunkId> {
        let chunk = self.chunk_mut(id)?;
        if !contract!(
            chunk.has_dynamic_item(item),
            "Chunk '{}' asked to move an item it does not own",
            chunk.identifier()
        ) {
            return None;
        }

        let half = Vec3::splat(diameter.max(0.0) * 0.5);
        let bounds = BoundingBox::new(new_position - half, new_position + half);
        let stayed = chunk.mod_dynamic_item(item, new_position);
        self.withdraw_item_loans(id, item);

        if stayed {
            if item.wants_lending() {
                self.lend_by_bounding_box(id, item, bounds);
            }
            return Some(id);
        }

        let Some(home) = self.find_chunk_from_point(new_position) else {
            log::debug!("Dynamic item left the loaded world at {:?}", new_position);
            return None;
        };
        if let Some(chunk) = self.chunk_mut(home) {
            chunk.add_dynamic_item(item.clone());
        }
        if item.wants_lending() {
            self.lend_by_bounding_box(home, item, bounds);
        }
        Some(home)
    }

    /// Lend an item to every bound neighbour whose bounds meet `bounds`.
    /// Returns the number of new loans.
    pub fn lend_by_bounding_box(&mut self, lender: ChunkId, item: &ChunkItemPtr, bounds: BoundingBox) -> usize {
        let Some(owner) = self.chunk(lender) else {
            return 0;
        };
        if !owner.is_bound() || !lending_needed(owner, &bounds) {
            return 0;
        }

        let mut borrowers = Vec::new();
        for neighbour in owner.bound_neighbours() {
            if neighbour == lender {
                continue;
            }
            let Some(borrower) = self.chunk_mut(neighbour) else {
                continue;
            };
            if !borrower.is_bound() || !borrower.bounding_box().intersects(&bounds) {
                continue;
            }
            if borrower.add_loan_item(lender, item.clone()) {
                borrowers.push(neighbour);
            }
        }

        let lent = borrowers.len();
        if let Some(owner) = self.chunk_mut(lender) {
            for borrower in borrowers {
                owner.add_borrower(borrower);
            }
        }
        lent
    }

    /// Make the loans a newly bound chunk takes part in, in both directions
    pub(crate) fn lend_on_bind(&mut self, id: ChunkId) {
        let Some(chunk) = self.chunk(id) else {
            return;
        };
        let own: Vec<ChunkItemPtr> = chunk.own_items().filter(|i| i.wants_lending()).cloned().collect();
        let neighbours = chunk.bound_neighbours();
        let bounds = *chunk.bounding_box();

        for item in &own {
            self.lend_by_bounding_box(id, item, item.bounding_box());
        }

        for neighbour in neighbours {
            let Some(lender) = self.chunk(neighbour) else {
                continue;
            };
            if !lender.is_bound() {
                continue;
            }
            let lendable: Vec<ChunkItemPtr> = lender
                .own_items()
                .filter(|i| i.wants_lending())
                .filter(|i| {
                    let item_bounds = i.bounding_box();
                    item_bounds.intersects(&bounds) && lending_needed(lender, &item_bounds)
                })
                .cloned()
                .collect();

            let mut borrowed = false;
            if let Some(borrower) = self.chunk_mut(id) {
                for item in lendable {
                    borrowed |= borrower.add_loan_item(neighbour, item);
                }
            }
            if borrowed {
                if let Some(lender) = self.chunk_mut(neighbour) {
                    lender.add_borrower(id);
                }
            }
        }
    }

    /// Withdraw every loan a chunk has made or holds
    pub(crate) fn withdraw_loans(&mut self, id: ChunkId) {
        let Some(chunk) = self.chunk_mut(id) else {
            return;
        };
        let borrowers = chunk.take_borrowers();
        let lenders = chunk.take_lenders();

        for borrower in borrowers {
            if let Some(borrower) = self.chunk_mut(borrower) {
                borrower.drop_loans_from(id);
            }
        }
        for record in lenders {
            if let Some(lender) = self.chunk_mut(record.lender) {
                lender.remove_borrower(id);
            }
        }
    }

    /// Withdraw the loans of one item
    fn withdraw_item_loans(&mut self, id: ChunkId, item: &ChunkItemPtr) {
        let Some(chunk) = self.chunk(id) else {
            return;
        };
        for borrower in chunk.borrowers().to_vec() {
            if let Some(borrower) = self.chunk_mut(borrower) {
                borrower.del_loan_item(item);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::item::ModelItem;
    use crate::mapping::GeometryMapping;
    use crate::section::{outside_chunk_identifier, ChunkSection};

    fn bound_pair() -> (ChunkSpace, ChunkId, ChunkId) {
        let mut space = ChunkSpace::new();
        let mapping = space.add_mapping(GeometryMapping::default());
        let mut ids = Vec::new();
        for x in 0..2 {
            let id = space.find_or_add_chunk(&outside_chunk_identifier(x, 0), mapping);
            space
                .load_chunk_now(id, &ChunkSection::default_outside(x, 0, 100.0, 0.0, 100.0))
                .unwrap();
            space.bind_chunk(id, true).unwrap();
            ids.push(id);
        }
        (space, ids[0], ids[1])
    }

    fn lamp(min: Vec3, max: Vec3) -> ChunkItemPtr {
        Arc::new(ModelItem::new("lamp.model", BoundingBox::new(min, max)).with_lending(true))
    }

    #[test]
    fn test_static_item_lent_across_border() {
        let (mut space, a, b) = bound_pair();
        let item = lamp(Vec3::new(95.0, 0.0, 40.0), Vec3::new(105.0, 10.0, 50.0));
        assert!(space.add_static_item(a, item.clone()));

        assert!(space.chunk(b).unwrap().is_loan_item(&item));
        assert_eq!(space.chunk(a).unwrap().borrowers(), &[b]);

        assert!(space.del_static_item(a, &item));
        assert!(!space.chunk(b).unwrap().is_loan_item(&item));
    }

    #[test]
    fn test_items_inside_one_chunk_stay_home() {
        let (mut space, a, b) = bound_pair();
        let item = lamp(Vec3::new(10.0, 0.0, 10.0), Vec3::new(20.0, 10.0, 20.0));
        space.add_static_item(a, item.clone());
        assert!(!space.chunk(b).unwrap().is_loan_item(&item));
    }

    #[test]
    fn test_unbind_withdraws_loans() {
        let (mut space, a, b) = bound_pair();
        let item = lamp(Vec3::new(95.0, 0.0, 40.0), Vec3::new(105.0, 10.0, 50.0));
        space.add_static_item(a, item.clone());

        space.unbind_chunk(b, false).unwrap();
        assert!(space.chunk(b).unwrap().lenders().is_empty());
        assert!(space.chunk(a).unwrap().borrowers().is_empty());

        space.bind_chunk(b, true).unwrap();
        assert!(space.chunk(b).unwrap().is_loan_item(&item));
    }

    #[test]
    fn test_dynamic_item_moves_home() {
        let (mut space, a, b) = bound_pair();
        let cart: ChunkItemPtr = Arc::new(ModelItem::new("cart.model", BoundingBox::new(Vec3::ZERO, Vec3::ONE)));
        assert!(space.add_dynamic_item(a, cart.clone()));

        assert_eq!(space.mod_dynamic_item(a, &cart, Vec3::new(50.0, 5.0, 50.0), 1.0), Some(a));
        assert_eq!(space.mod_dynamic_item(a, &cart, Vec3::new(150.0, 5.0, 50.0), 1.0), Some(b));
        assert!(!space.chunk(a).unwrap().has_dynamic_item(&cart));
        assert!(space.chunk(b).unwrap().has_dynamic_item(&cart));

        assert_eq!(space.mod_dynamic_item(b, &cart, Vec3::new(950.0, 5.0, 50.0), 1.0), None);
        assert!(!space.chunk(b).unwrap().has_dynamic_item(&cart));
    }
}
