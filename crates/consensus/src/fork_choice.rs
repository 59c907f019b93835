//! Deterministic QC preference.

use bedrock_types::QuorumCertificate;

/// Select the preferred of two QCs.
///
/// Higher round wins; ties break toward the lexicographically greater block
/// hash; `None` is dominated by any QC. The ordering is total and
/// deterministic, so block-store readers, relays, and recovering replicas
/// all resolve the same preference.
pub fn fork_choice<'a>(
    a: Option<&'a QuorumCertificate>,
    b: Option<&'a QuorumCertificate>,
) -> Option<&'a QuorumCertificate> {
    match (a, b) {
        (None, b) => b,
        (a, None) => a,
        (Some(x), Some(y)) => {
            if x.round > y.round {
                Some(x)
            } else if y.round > x.round {
                Some(y)
            } else if x.block_hash >= y.block_hash {
                Some(x)
            } else {
                Some(y)
            }
        }
    }
}
