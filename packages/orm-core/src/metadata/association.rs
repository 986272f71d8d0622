//! Association mappings and their cascade/fetch options.

use std::fmt;

/// Lifecycle operation that may propagate along an association.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CascadeType {
    Persist,
    Merge,
    Remove,
    Detach,
}

impl CascadeType {
    const fn bit(self) -> u8 {
        match self {
            CascadeType::Persist => 0b0001,
            CascadeType::Merge => 0b0010,
            CascadeType::Remove => 0b0100,
            CascadeType::Detach => 0b1000,
        }
    }

    /// Every cascade type, in declaration order.
    pub const ALL: [CascadeType; 4] = [
        CascadeType::Persist,
        CascadeType::Merge,
        CascadeType::Remove,
        CascadeType::Detach,
    ];
}

impl fmt::Display for CascadeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CascadeType::Persist => "persist",
            CascadeType::Merge => "merge",
            CascadeType::Remove => "remove",
            CascadeType::Detach => "detach",
        };
        write!(f, "{}", name)
    }
}

/// Set of cascaded operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct CascadeSet(u8);

impl CascadeSet {
    pub const NONE: CascadeSet = CascadeSet(0);
    pub const ALL: CascadeSet = CascadeSet(0b1111);

    /// Builds a set from the listed operations.
    pub fn of(types: &[CascadeType]) -> Self {
        CascadeSet(types.iter().fold(0, |bits, t| bits | t.bit()))
    }

    pub fn contains(self, cascade: CascadeType) -> bool {
        self.0 & cascade.bit() != 0
    }

    pub fn with(self, cascade: CascadeType) -> Self {
        CascadeSet(self.0 | cascade.bit())
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

/// When an association is loaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FetchMode {
    /// Loaded on first access
    #[default]
    Lazy,
    /// Loaded together with the owning entity
    Eager,
}

/// Owning to-one side of a relation; holds the foreign-key column.
#[derive(Debug, Clone, PartialEq)]
pub struct ManyToOne {
    /// Association name on the owning entity
    pub name: String,
    /// Referenced entity type
    pub target: String,
    /// Foreign-key column in the owning table
    pub column: String,
    /// Whether the reference may be absent
    pub nullable: bool,
    /// Fetch mode (default: eager)
    pub fetch: FetchMode,
    /// Cascaded operations
    pub cascade: CascadeSet,
}

impl ManyToOne {
    /// Creates an optional, eager reference stored in `<name>_id`.
    pub fn new(name: impl Into<String>, target: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            column: format!("{}_id", name),
            name,
            target: target.into(),
            nullable: true,
            fetch: FetchMode::Eager,
            cascade: CascadeSet::NONE,
        }
    }

    pub fn column(mut self, column: impl Into<String>) -> Self {
        self.column = column.into();
        self
    }

    /// Makes the foreign key mandatory (NOT NULL).
    pub fn required(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn fetch(mut self, fetch: FetchMode) -> Self {
        self.fetch = fetch;
        self
    }

    pub fn cascade(mut self, cascade: CascadeSet) -> Self {
        self.cascade = cascade;
        self
    }
}

/// Inverse to-many side of a relation, mapped by a [`ManyToOne`] on the target.
#[derive(Debug, Clone, PartialEq)]
pub struct OneToMany {
    /// Collection name on the owning entity
    pub name: String,
    /// Element entity type
    pub target: String,
    /// Name of the to-one association on the element that points back
    pub mapped_by: String,
    /// Fetch mode (default: lazy)
    pub fetch: FetchMode,
    /// Cascaded operations
    pub cascade: CascadeSet,
    /// Delete elements removed from the collection
    pub orphan_removal: bool,
}

impl OneToMany {
    pub fn new(
        name: impl Into<String>,
        target: impl Into<String>,
        mapped_by: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            target: target.into(),
            mapped_by: mapped_by.into(),
            fetch: FetchMode::Lazy,
            cascade: CascadeSet::NONE,
            orphan_removal: false,
        }
    }

    pub fn fetch(mut self, fetch: FetchMode) -> Self {
        self.fetch = fetch;
        self
    }

    pub fn cascade(mut self, cascade: CascadeSet) -> Self {
        self.cascade = cascade;
        self
    }

    pub fn orphan_removal(mut self, orphan_removal: bool) -> Self {
        self.orphan_removal = orphan_removal;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ntest::timeout;

    #[timeout(1000)]
    #[test]
    fn test_cascade_set_membership() {
        let set = CascadeSet::of(&[CascadeType::Persist, CascadeType::Remove]);
        assert!(set.contains(CascadeType::Persist));
        assert!(set.contains(CascadeType::Remove));
        assert!(!set.contains(CascadeType::Merge));
        assert!(set.with(CascadeType::Merge).contains(CascadeType::Merge));
        assert!(CascadeSet::NONE.is_empty());
        assert!(CascadeType::ALL.iter().all(|t| CascadeSet::ALL.contains(*t)));
    }

    #[timeout(1000)]
    #[test]
    fn test_association_defaults() {
        let parent = ManyToOne::new("parent", "Parent");
        assert_eq!(parent.column, "parent_id");
        assert!(parent.nullable);
        assert_eq!(parent.fetch, FetchMode::Eager);

        let children = OneToMany::new("children", "Child", "parent");
        assert_eq!(children.fetch, FetchMode::Lazy);
        assert!(!children.orphan_removal);
        assert!(children.cascade.is_empty());
    }
}
