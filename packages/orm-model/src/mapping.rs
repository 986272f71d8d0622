//! Mapping metadata for the Parent/Child model.

use orm_core::{
    CascadeSet, CascadeType, EntityType, FetchMode, FieldDef, ManyToOne, Metadata, OneToMany,
    Result,
};

/// Entity type name of [`crate::Parent`].
pub const PARENT: &str = "Parent";
/// Entity type name of [`crate::Child`].
pub const CHILD: &str = "Child";

/// Builds the mapping.
///
/// A parent owns its children: persist, detach, merge and remove cascade
/// from the parent and children dropped from the collection are deleted.
/// The collection is lazy. Each child must reference a parent through the
/// `PARENT_ID` column; the reference is lazy as well.
pub fn metadata() -> Result<Metadata> {
    Metadata::builder()
        .entity(
            EntityType::new(PARENT)
                .with_table("PARENT")
                .with_field(FieldDef::new("name"))
                .with_one_to_many(
                    OneToMany::new("children", CHILD, "parent")
                        .fetch(FetchMode::Lazy)
                        .cascade(CascadeSet::of(&[
                            CascadeType::Persist,
                            CascadeType::Detach,
                            CascadeType::Merge,
                            CascadeType::Remove,
                        ]))
                        .orphan_removal(true),
                ),
        )
        .entity(
            EntityType::new(CHILD)
                .with_table("CHILD")
                .with_field(FieldDef::new("name").default_value("default"))
                .with_many_to_one(
                    ManyToOne::new("parent", PARENT)
                        .column("PARENT_ID")
                        .required()
                        .fetch(FetchMode::Lazy),
                ),
        )
        .build()
}
