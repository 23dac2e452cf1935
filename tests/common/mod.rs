use std::net::IpAddr;

use domain::base::Rtype;
use keywatch::resolver::{Answer, AnswerRecord, RecordData, ResolveError, ZoneResolver};
use keywatch::store::{ObservedKey, ObservedSignature, ZoneName};

/// A zone as a nameserver serves it at one moment.
pub struct ServedZone {
    pub serial: u32,
    pub keys: Vec<ObservedKey>,
    pub signers: Vec<u16>,
}

impl ServedZone {
    fn signatures(&self, zone: &ZoneName, rtype: Rtype) -> Vec<ObservedSignature> {
        self.signers
            .iter()
            .map(|&signer| ObservedSignature {
                rtype: rtype.to_int(),
                ttl: 3600,
                key_tag: signer,
                algorithm: 8,
                inception: self.serial,
                expiration: self.serial + 1,
                signature: format!("{zone} {rtype} {} {signer}", self.serial).into_bytes(),
            })
            .collect()
    }
}

impl ZoneResolver for ServedZone {
    async fn resolve(
        &self,
        zone: &ZoneName,
        rtype: Rtype,
        _nameserver: IpAddr,
    ) -> Result<Answer, ResolveError> {
        let data = if rtype == Rtype::DNSKEY {
            self.keys.iter().cloned().map(RecordData::Dnskey).collect()
        } else if rtype == Rtype::SOA {
            vec![RecordData::Soa {
                serial: self.serial,
            }]
        } else if rtype == Rtype::NS {
            vec![RecordData::Ns(format!("ns1.{zone}"))]
        } else {
            return Err(ResolveError::Refused(format!("no {rtype} here")));
        };
        Ok(Answer {
            records: data
                .into_iter()
                .map(|data| AnswerRecord { ttl: 3600, data })
                .collect(),
            signatures: self.signatures(zone, rtype),
        })
    }
}

pub fn key(tag: u16, flags: u16) -> ObservedKey {
    ObservedKey {
        flags,
        protocol: 3,
        algorithm: 8,
        public_key: format!("public key {tag}").into_bytes(),
        key_tag: tag,
    }
}
