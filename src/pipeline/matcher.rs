use crate::store::CdcRecord;

/// A closure that decides whether a CDC record is the echo of a
/// particular write (specification §4.E, "matcher protocol"). Built by
/// [`crate::provider::Provider::store`] and consumed by anything
/// correlating writes to their CDC confirmation without a read-back
/// query — e.g. a future strong-consistency implementation.
pub struct Matcher {
    predicate: Box<dyn Fn(&CdcRecord) -> bool + Send + Sync>,
}

impl Matcher {
    pub fn new(predicate: impl Fn(&CdcRecord) -> bool + Send + Sync + 'static) -> Self {
        Self { predicate: Box::new(predicate) }
    }

    pub fn matches(&self, record: &CdcRecord) -> bool {
        (self.predicate)(record)
    }
}
