/// Hierarchy kernel: Entity Type Registry
///
/// Which types may sit under which.
///
/// `None` in a parent set means the type is root-capable.

use crate::domain::EntityType;

/// Legal parent types for `child`. Exhaustive by construction.
pub fn allowed_parents(child: EntityType) -> &'static [Option<EntityType>] {
    match child {
        EntityType::Warehouse => &[None],
        EntityType::Department => &[
            None,
            Some(EntityType::Warehouse),
            Some(EntityType::Department),
        ],
        EntityType::StorageArea => &[
            None,
            Some(EntityType::Warehouse),
            Some(EntityType::Department),
        ],
        EntityType::StaticRack => &[
            Some(EntityType::Department),
            Some(EntityType::StorageArea),
        ],
        EntityType::MobileRack => &[
            Some(EntityType::Department),
            Some(EntityType::StorageArea),
            Some(EntityType::MobileStorageParkingSpot),
        ],
        EntityType::MobileStorageParkingSpot => &[
            Some(EntityType::Department),
            Some(EntityType::StorageArea),
        ],
        EntityType::Bin => &[Some(EntityType::StaticRack), Some(EntityType::MobileRack)],
        EntityType::Box => &[
            None,
            Some(EntityType::Department),
            Some(EntityType::StorageArea),
            Some(EntityType::StaticRack),
            Some(EntityType::MobileRack),
            Some(EntityType::Bin),
            Some(EntityType::Workstation),
        ],
        EntityType::Workstation => &[
            Some(EntityType::Department),
            Some(EntityType::StorageArea),
        ],
        EntityType::Device => &[
            None,
            Some(EntityType::Bin),
            Some(EntityType::Box),
            Some(EntityType::Workstation),
        ],
    }
}

pub fn can_be_child_of(child: EntityType, parent: Option<EntityType>) -> bool {
    allowed_parents(child).contains(&parent)
}

pub fn is_root_capable(entity_type: EntityType) -> bool {
    can_be_child_of(entity_type, None)
}

/// Inverse table: types that may be placed under `parent`.
pub fn allowed_children(parent: Option<EntityType>) -> Vec<EntityType> {
    EntityType::ALL
        .iter()
        .copied()
        .filter(|child| can_be_child_of(*child, parent))
        .collect()
}
