//! lz4 compressed rkyv archives

use rkyv::{
    ser::serializers::AllocSerializer, validation::validators::DefaultValidator, AlignedVec,
    Archive, CheckBytes, Deserialize, Serialize,
};

use crate::StoreError;

/// Archives `value` and compresses the archive, prepending its size
pub fn encode<T>(value: &T) -> Result<Vec<u8>, StoreError>
where
    T: Serialize<AllocSerializer<256>>,
{
    let bytes =
        rkyv::to_bytes::<T, 256>(value).map_err(|err| StoreError::Encode(format!("{:?}", err)))?;
    Ok(lz4_flex::compress_prepend_size(&bytes))
}

/// Decompresses and validates an archive written by [encode]
///
/// `key` only labels the error when the bytes are not a valid archive of `T`.
pub fn decode<T>(key: &[u8], bytes: &[u8]) -> Result<T, StoreError>
where
    T: Archive,
    T::Archived: for<'a> CheckBytes<DefaultValidator<'a>> + Deserialize<T, rkyv::Infallible>,
{
    let decompressed =
        lz4_flex::decompress_size_prepended(bytes).map_err(|err| StoreError::corrupt(key, err))?;
    // archives must be read from an aligned buffer
    let mut aligned = AlignedVec::with_capacity(decompressed.len());
    aligned.extend_from_slice(&decompressed);

    let archived = rkyv::check_archived_root::<T>(&aligned)
        .map_err(|_| StoreError::corrupt(key, "archive validation failed"))?;
    match archived.deserialize(&mut rkyv::Infallible) {
        Ok(value) => Ok(value),
        Err(never) => match never {},
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chunked_aggregation::aggregator::AggState;

    #[test]
    fn agg_state_survives_encoding() {
        let mut state = AggState::new(4.0);
        state.update(-1.5);
        let bytes = encode(&state).unwrap();
        let decoded: AggState = decode(b"state", &bytes).unwrap();
        assert_eq!(decoded, state);
    }

    #[test]
    fn garbage_is_corrupt() {
        let err = decode::<AggState>(b"state", &[1, 2, 3]).unwrap_err();
        assert!(matches!(err, StoreError::Corrupt { ref key, .. } if key == "state"));

        let truncated = &encode(&vec![1u32, 2, 3]).unwrap()[..6];
        assert!(decode::<Vec<u32>>(b"rows", truncated).is_err());
    }
}
