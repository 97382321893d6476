use super::CatalogError;

pub type Oid = u32;

/// First OID handed to user objects; lower values belong to built-ins.
pub const FIRST_NORMAL_OID: Oid = 16_384;

/// Monotonic OID source shared by schemas and routines of one catalog.
#[derive(Debug, Clone)]
pub struct OidGenerator {
    next: Oid,
}

impl Default for OidGenerator {
    fn default() -> Self {
        Self {
            next: FIRST_NORMAL_OID,
        }
    }
}

impl OidGenerator {
    pub fn next_oid(&mut self) -> Result<Oid, CatalogError> {
        let assigned = self.next;
        self.next = assigned
            .checked_add(1)
            .ok_or(CatalogError::OidSpaceExhausted)?;
        Ok(assigned)
    }
}
