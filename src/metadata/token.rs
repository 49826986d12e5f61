//! Metadata tokens.
//!
//! A [`Token`] names one row of one metadata table. The [`table`] module lists the table
//! identifiers the loader reads.

use std::fmt;
use std::hash::{Hash, Hasher};

/// A metadata token representing a reference to a metadata table entry.
///
/// Tokens in .NET metadata consist of a 32-bit value where:
/// - The high byte (bits 24-31) indicates the table type
/// - The low 24 bits (bits 0-23) indicate the row index within that table
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Token(pub u32);

/// Table identifiers carried in the high byte of a [`Token`].
pub mod table {
    /// `Module` table
    pub const MODULE: u8 = 0x00;
    /// `TypeRef` table
    pub const TYPE_REF: u8 = 0x01;
    /// `TypeDef` table
    pub const TYPE_DEF: u8 = 0x02;
    /// `Field` table
    pub const FIELD: u8 = 0x04;
    /// `MethodDef` table
    pub const METHOD_DEF: u8 = 0x06;
    /// `Param` table
    pub const PARAM: u8 = 0x08;
    /// `InterfaceImpl` table
    pub const INTERFACE_IMPL: u8 = 0x09;
    /// `MemberRef` table
    pub const MEMBER_REF: u8 = 0x0A;
    /// `ClassLayout` table
    pub const CLASS_LAYOUT: u8 = 0x0F;
    /// `Event` table
    pub const EVENT: u8 = 0x14;
    /// `Property` table
    pub const PROPERTY: u8 = 0x17;
    /// `MethodImpl` table
    pub const METHOD_IMPL: u8 = 0x19;
    /// `ModuleRef` table
    pub const MODULE_REF: u8 = 0x1A;
    /// `TypeSpec` table
    pub const TYPE_SPEC: u8 = 0x1B;
    /// `AssemblyRef` table
    pub const ASSEMBLY_REF: u8 = 0x23;
    /// `NestedClass` table
    pub const NESTED_CLASS: u8 = 0x29;
    /// `GenericParam` table
    pub const GENERIC_PARAM: u8 = 0x2A;
    /// `MethodSpec` table
    pub const METHOD_SPEC: u8 = 0x2B;
}

impl Token {
    /// Creates a new token from a raw 32-bit value
    #[must_use]
    pub fn new(value: u32) -> Self {
        Token(value)
    }

    /// Creates a token from a table identifier and a 1-based row index
    #[must_use]
    pub fn from_parts(table: u8, row: u32) -> Self {
        Token((u32::from(table) << 24) | (row & 0x00FF_FFFF))
    }

    /// Returns the raw token value
    #[must_use]
    pub fn value(&self) -> u32 {
        self.0
    }

    /// Extracts the table type from the token (high byte)
    #[must_use]
    pub fn table(&self) -> u8 {
        (self.0 >> 24) as u8
    }

    /// Extracts the row index from the token (low 24 bits)
    #[must_use]
    pub fn row(&self) -> u32 {
        self.0 & 0x00FF_FFFF
    }

    /// Returns true if this is a null token (value 0)
    ///
    /// A token with a valid table but a zero row, as used for an absent `extends`, is
    /// also treated as null.
    #[must_use]
    pub fn is_null(&self) -> bool {
        self.row() == 0
    }

    /// Returns true if the token addresses the given table
    #[must_use]
    pub fn is_table(&self, table: u8) -> bool {
        self.table() == table
    }
}

impl From<u32> for Token {
    fn from(value: u32) -> Self {
        Token(value)
    }
}

impl From<Token> for u32 {
    fn from(token: Token) -> Self {
        token.0
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Token(0x{:08x}, table: 0x{:02x}, row: {})",
            self.0,
            self.table(),
            self.row()
        )
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08x}", self.0)
    }
}

impl Hash for Token {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.hash(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_token_from_parts() {
        let token = Token::from_parts(table::TYPE_DEF, 5);
        assert_eq!(token.value(), 0x02000005);
        assert!(token.is_table(table::TYPE_DEF));
        assert_eq!(token.row(), 5);
    }

    #[test]
    fn test_token_row_masked() {
        let token = Token::from_parts(table::METHOD_DEF, 0x01FF_FFFF);
        assert_eq!(token.row(), 0x00FF_FFFF);
        assert_eq!(token.table(), table::METHOD_DEF);
    }

    #[test]
    fn test_token_is_null() {
        assert!(Token(0).is_null());
        assert!(Token::from_parts(table::TYPE_REF, 0).is_null());
        assert!(!Token(0x06000001).is_null());
    }

    #[test]
    fn test_token_display_debug() {
        let token = Token(0x06000001);
        assert_eq!(format!("{}", token), "0x06000001");
        assert_eq!(
            format!("{:?}", token),
            "Token(0x06000001, table: 0x06, row: 1)"
        );
    }

    #[test]
    fn test_token_hash_key() {
        let mut map = HashMap::new();
        map.insert(Token(0x02000001), "first");
        map.insert(Token(0x02000002), "second");

        assert_eq!(map.get(&Token(0x02000001)), Some(&"first"));
        assert_eq!(map.get(&Token(0x02000003)), None);
    }

    #[test]
    fn test_token_ordering() {
        let mut tokens = vec![Token(0x02000003), Token(0x01000001), Token(0x02000001)];
        tokens.sort();
        assert_eq!(
            tokens,
            vec![Token(0x01000001), Token(0x02000001), Token(0x02000003)]
        );
    }
}
