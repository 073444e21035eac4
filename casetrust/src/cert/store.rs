// Certificate store: a fixed-capacity arena of decoded certificates,
// addressed by stable index. Chain validation lives in `validator.rs`.

use bytes::Bytes;
use tracing::debug;

use crate::cert::{CertFlags, Certificate, LoadFlags, TrustRootId};
use crate::crypto::keys::KeyId;
use crate::error::{CaseTrustError, Result};

/// Fixed-capacity certificate store.
///
/// Slots `0..len()` are always occupied. `S` is either owned
/// (`Vec<Option<Certificate>>`, see [`CertificateStore::with_capacity`]) or
/// caller-provided (`&mut [Option<Certificate>]`, see
/// [`CertificateStore::with_storage`]).
///
/// Loading takes `&mut self`; validation only needs `&self`, so one store can
/// back any number of concurrent sessions.
#[derive(Debug)]
pub struct CertificateStore<S = Vec<Option<Certificate>>> {
    slots: S,
    count: usize,
}

impl CertificateStore {
    /// Store owning room for `capacity` certificates.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: std::iter::repeat_with(|| None).take(capacity).collect(),
            count: 0,
        }
    }
}

impl<'a> CertificateStore<&'a mut [Option<Certificate>]> {
    /// Store over caller-provided slots. Existing slot contents are dropped.
    pub fn with_storage(storage: &'a mut [Option<Certificate>]) -> Self {
        storage.iter_mut().for_each(|slot| *slot = None);
        Self {
            slots: storage,
            count: 0,
        }
    }
}

impl<S: AsRef<[Option<Certificate>]>> CertificateStore<S> {
    pub fn capacity(&self) -> usize {
        self.slots.as_ref().len()
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn get(&self, index: usize) -> Option<&Certificate> {
        self.slots.as_ref()[..self.count].get(index)?.as_ref()
    }

    /// Loaded certificates with their indices, in load order.
    pub fn iter(&self) -> impl Iterator<Item = (usize, &Certificate)> {
        self.slots.as_ref()[..self.count]
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| slot.as_ref().map(|cert| (i, cert)))
    }

    /// Index of a certificate with byte-identical encoding, if loaded.
    pub fn position_of(&self, cert: &Certificate) -> Option<usize> {
        self.position_of_encoding(cert.encoded())
    }

    fn position_of_encoding(&self, encoded: &Bytes) -> Option<usize> {
        self.iter()
            .find(|(_, c)| c.encoded() == encoded)
            .map(|(i, _)| i)
    }

    /// First loaded certificate whose subject key id is `key_id`.
    pub fn find_by_subject_key_id(&self, key_id: &KeyId) -> Option<(usize, &Certificate)> {
        self.iter().find(|(_, c)| c.subject_key_id() == key_id)
    }

    /// Subject key ids of every trust anchor, in load order.
    pub fn trust_anchor_ids(&self) -> Vec<TrustRootId> {
        self.iter()
            .filter(|(_, c)| c.is_trust_anchor())
            .map(|(_, c)| *c.subject_key_id())
            .collect()
    }

    /// Whether a trust anchor with subject key id `id` is loaded.
    pub fn has_trust_anchor(&self, id: &TrustRootId) -> bool {
        self.iter()
            .any(|(_, c)| c.is_trust_anchor() && c.subject_key_id() == id)
    }
}

impl<S> CertificateStore<S>
where
    S: AsRef<[Option<Certificate>]> + AsMut<[Option<Certificate>]>,
{
    /// Decode `encoded` and add it to the store, returning its index.
    ///
    /// Loading a byte-identical encoding again returns the existing index
    /// and leaves the store unchanged, even when full. On error the store is
    /// untouched.
    pub fn load(&mut self, encoded: Bytes, flags: LoadFlags) -> Result<usize> {
        let mut cert = Certificate::decode(encoded)?;

        if let Some(index) = self.position_of_encoding(cert.encoded()) {
            debug!(index, "certificate already loaded");
            return Ok(index);
        }
        if self.count >= self.capacity() {
            return Err(CaseTrustError::ResourceExhausted(format!(
                "certificate store full ({} slots)",
                self.capacity()
            )));
        }

        if flags.contains(LoadFlags::COMPUTE_TBS_HASH) {
            cert.compute_tbs_hash();
        }
        if flags.contains(LoadFlags::TRUST_ANCHOR) {
            cert.flags.insert(CertFlags::IS_TRUST_ANCHOR);
        }

        let index = self.count;
        debug!(
            index,
            trust_anchor = cert.is_trust_anchor(),
            ca = cert.is_ca(),
            "loaded certificate"
        );
        self.slots.as_mut()[index] = Some(cert);
        self.count += 1;
        Ok(index)
    }

    /// Remove the most recently loaded certificate.
    pub fn release_last(&mut self) -> Option<Certificate> {
        if self.count == 0 {
            return None;
        }
        self.count -= 1;
        self.slots.as_mut()[self.count].take()
    }

    /// Remove every certificate. Capacity is unchanged.
    pub fn clear(&mut self) {
        let count = self.count;
        self.slots.as_mut()[..count]
            .iter_mut()
            .for_each(|slot| *slot = None);
        self.count = 0;
    }
}
