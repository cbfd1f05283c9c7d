use bytemuck::{Pod, Zeroable};

macro_rules! bundle_id {
    ($(#[$meta:meta])* $name:ident, $kind:literal) => {
        $(#[$meta])*
        #[repr(transparent)]
        #[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Pod, Zeroable)]
        pub struct $name(pub u32);

        impl $name {
            /// Reserved id meaning "none"
            pub const INVALID: Self = Self(0);
            pub const KIND: &'static str = $kind;

            /// Id of the `index`-th entry of its table
            pub fn from_index(index: usize) -> Self {
                Self(index as u32 + 1)
            }

            pub fn is_valid(&self) -> bool {
                self.0 != 0
            }

            /// Position in its table, `None` for [`Self::INVALID`]
            pub fn index(&self) -> Option<usize> {
                self.0.checked_sub(1).map(|index| index as usize)
            }

            pub fn raw(&self) -> u32 {
                self.0
            }
        }

        impl From<$name> for u32 {
            fn from(value: $name) -> Self {
                value.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}#{}", $kind, self.0)
            }
        }
    };
}

bundle_id!(
    /// Id of a string, used by every `name` field
    StringId,
    "string"
);
bundle_id!(TextureId, "texture");
bundle_id!(MaterialId, "material");
bundle_id!(MeshId, "mesh");
bundle_id!(ObjectId, "object");
bundle_id!(GroupId, "group");
bundle_id!(EnvironmentId, "environment");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_id() {
        assert!(!TextureId::INVALID.is_valid());
        assert_eq!(TextureId::INVALID.index(), None);
        assert_eq!(TextureId(3).index(), Some(2));
    }

    #[test]
    fn test_from_index() {
        assert_eq!(MeshId::from_index(0), MeshId(1));
        assert_eq!(MeshId::from_index(41).index(), Some(41));
    }

    #[test]
    fn test_display() {
        assert_eq!(GroupId(7).to_string(), "group#7");
    }
}
