strong_type!(BlockId, u64);
strong_type!(NodeId, u32);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_id() {
        let id = BlockId(12345);
        assert_eq!(*id, 12345u64);
        assert_eq!(format!("{:?}", id), "BlockId(12345)");
    }

    #[test]
    fn test_node_id_ordering() {
        assert!(NodeId(1) < NodeId(2));
        let raw: u32 = NodeId(5).into();
        assert_eq!(raw, 5);
    }
}
