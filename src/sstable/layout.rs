//! Layout introspection — enumerate and pretty-print a table's blocks.
//!
//! [`Reader::layout`] walks the index (one or two levels) and collects
//! every block handle in the file; [`Layout::describe`] renders them
//! sorted by offset, optionally walking each block's internal structure
//! through the cursors' observable API. Offline debugging only — nothing
//! here is on a hot path.

use std::io::{self, Write};

use crate::block::{BlockIter, RawBlockIter};
use crate::encoding::{decode_block_handle, BlockHandle};

use super::{Reader, SSTableError, LEVELDB_FOOTER_LEN};

/// The block organization of a table.
#[derive(Debug, Default, Clone)]
pub struct Layout {
    /// Data block handles, in key order.
    pub data: Vec<BlockHandle>,

    /// Index block handles: the single index block, or every sub-index
    /// of a partitioned index.
    pub index: Vec<BlockHandle>,

    /// Top-level index handle of a partitioned index.
    pub top_index: Option<BlockHandle>,

    /// Filter block; zero length when absent.
    pub filter: BlockHandle,

    /// Range-deletion block; zero length when absent.
    pub range_del: BlockHandle,

    /// Properties block.
    pub properties: BlockHandle,

    /// Metaindex block.
    pub metaindex: BlockHandle,

    /// Footer extent.
    pub footer: BlockHandle,
}

impl Reader {
    /// Collects every block handle in the table.
    pub fn layout(&self) -> Result<Layout, SSTableError> {
        if self.is_closed() {
            return Err(SSTableError::Closed);
        }
        let mut layout = Layout {
            data: Vec::with_capacity(self.properties.num_data_blocks as usize),
            index: Vec::new(),
            top_index: None,
            filter: self.filter.bh,
            range_del: self.range_del.bh,
            properties: self.properties_bh,
            metaindex: self.metaindex_bh,
            footer: self.footer_bh,
        };

        let index_handle = self.read_index()?;
        if self.properties.index_partitions == 0 {
            layout.index.push(self.index.bh);
            self.collect_data_handles(index_handle, &mut layout.data)?;
        } else {
            layout.top_index = Some(self.index.bh);
            let mut top = BlockIter::new();
            top.init(self.cmp.compare, index_handle, self.properties.global_seq_num)?;
            let mut valid = top.first().is_some();
            while valid {
                let value = top.value();
                let (index_bh, n) = decode_block_handle(value);
                if n == 0 || n != value.len() {
                    return Err(SSTableError::Corruption("corrupt index entry"));
                }
                layout.index.push(index_bh);
                let sub_handle = self.read_block(index_bh, None)?;
                self.collect_data_handles(sub_handle, &mut layout.data)?;
                valid = top.next().is_some();
            }
        }
        Ok(layout)
    }

    fn collect_data_handles(
        &self,
        index_contents: crate::cache::CacheHandle,
        out: &mut Vec<BlockHandle>,
    ) -> Result<(), SSTableError> {
        let mut iter = BlockIter::new();
        iter.init(
            self.cmp.compare,
            index_contents,
            self.properties.global_seq_num,
        )?;
        let mut valid = iter.first().is_some();
        while valid {
            let value = iter.value();
            let (bh, n) = decode_block_handle(value);
            if n == 0 || n != value.len() {
                return Err(SSTableError::Corruption("corrupt index entry"));
            }
            out.push(bh);
            valid = iter.next().is_some();
        }
        Ok(())
    }
}

impl Layout {
    /// Pretty-prints the layout sorted by offset. With `verbose`, each
    /// block's entries and restart points are rendered as well.
    pub fn describe(
        &self,
        w: &mut dyn Write,
        verbose: bool,
        reader: &Reader,
    ) -> io::Result<()> {
        struct NamedBlock {
            bh: BlockHandle,
            name: &'static str,
        }
        let mut blocks = Vec::new();
        for &bh in &self.data {
            blocks.push(NamedBlock { bh, name: "data" });
        }
        for &bh in &self.index {
            blocks.push(NamedBlock { bh, name: "index" });
        }
        if let Some(bh) = self.top_index {
            blocks.push(NamedBlock {
                bh,
                name: "top-index",
            });
        }
        if self.filter.length != 0 {
            blocks.push(NamedBlock {
                bh: self.filter,
                name: "filter",
            });
        }
        if self.range_del.length != 0 {
            blocks.push(NamedBlock {
                bh: self.range_del,
                name: "range-del",
            });
        }
        if self.properties.length != 0 {
            blocks.push(NamedBlock {
                bh: self.properties,
                name: "properties",
            });
        }
        if self.metaindex.length != 0 {
            blocks.push(NamedBlock {
                bh: self.metaindex,
                name: "meta-index",
            });
        }
        if self.footer.length != 0 {
            let name = if self.footer.length == LEVELDB_FOOTER_LEN as u64 {
                "leveldb-footer"
            } else {
                "footer"
            };
            blocks.push(NamedBlock {
                bh: self.footer,
                name,
            });
        }
        blocks.sort_by_key(|block| block.bh.offset);

        for block in &blocks {
            writeln!(
                w,
                "{:>10}  {} ({})",
                block.bh.offset, block.name, block.bh.length
            )?;
            if !verbose {
                continue;
            }
            if matches!(block.name, "footer" | "leveldb-footer" | "filter") {
                continue;
            }

            let handle = match reader.read_block(block.bh, None) {
                Ok(handle) => handle,
                Err(err) => {
                    writeln!(w, "  [err: {err}]")?;
                    continue;
                }
            };

            match block.name {
                "data" | "range-del" => {
                    let mut iter = BlockIter::new();
                    if iter
                        .init(reader.cmp.compare, handle, reader.properties.global_seq_num)
                        .is_err()
                    {
                        writeln!(w, "  [err: corrupt block]")?;
                        continue;
                    }
                    let mut valid = iter.first().is_some();
                    while valid {
                        let (shared, unshared, value_len) = iter.entry_shape().unwrap_or_default();
                        write!(
                            w,
                            "{:>10}    record ({}+{}+{}/{})",
                            block.bh.offset + iter.offset() as u64,
                            shared,
                            unshared,
                            value_len,
                            iter.next_offset() - iter.offset()
                        )?;
                        write_restart_marker(w, restart_points(&iter), iter.offset())?;
                        valid = iter.next().is_some();
                    }
                    write_restart_array(w, block.bh.offset, restart_points(&iter), iter.restarts_offset())?;
                }
                "index" | "top-index" => {
                    let mut iter = BlockIter::new();
                    if iter
                        .init(reader.cmp.compare, handle, reader.properties.global_seq_num)
                        .is_err()
                    {
                        writeln!(w, "  [err: corrupt block]")?;
                        continue;
                    }
                    let mut valid = iter.first().is_some();
                    while valid {
                        let (bh, n) = decode_block_handle(iter.value());
                        if n == 0 || n != iter.value().len() {
                            writeln!(
                                w,
                                "{:>10}    [err: corrupt index entry]",
                                block.bh.offset + iter.offset() as u64
                            )?;
                            valid = iter.next().is_some();
                            continue;
                        }
                        write!(
                            w,
                            "{:>10}    block:{}/{}",
                            block.bh.offset + iter.offset() as u64,
                            bh.offset,
                            bh.length
                        )?;
                        write_restart_marker(w, restart_points(&iter), iter.offset())?;
                        valid = iter.next().is_some();
                    }
                    write_restart_array(w, block.bh.offset, restart_points(&iter), iter.restarts_offset())?;
                }
                "properties" | "meta-index" => {
                    let mut iter = match RawBlockIter::new(handle) {
                        Ok(iter) => iter,
                        Err(_) => {
                            writeln!(w, "  [err: corrupt block]")?;
                            continue;
                        }
                    };
                    let mut valid = iter.first();
                    while valid {
                        if block.name == "meta-index" {
                            let (bh, _) = decode_block_handle(iter.value());
                            write!(
                                w,
                                "{:>10}    {} block:{}/{}",
                                block.bh.offset + iter.offset() as u64,
                                String::from_utf8_lossy(iter.key()),
                                bh.offset,
                                bh.length
                            )?;
                        } else {
                            write!(
                                w,
                                "{:>10}    {} ({})",
                                block.bh.offset + iter.offset() as u64,
                                String::from_utf8_lossy(iter.key()),
                                iter.next_offset() - iter.offset()
                            )?;
                        }
                        let restarts: Vec<usize> = (0..iter.num_restarts())
                            .map(|i| iter.restart_point(i))
                            .collect();
                        write_restart_marker(w, restarts, iter.offset())?;
                        valid = iter.next();
                    }
                    let restarts: Vec<usize> = (0..iter.num_restarts())
                        .map(|i| iter.restart_point(i))
                        .collect();
                    write_restart_array(w, block.bh.offset, restarts, iter.restarts_offset())?;
                }
                _ => {}
            }
        }
        Ok(())
    }
}

fn restart_points(iter: &BlockIter) -> Vec<usize> {
    (0..iter.num_restarts())
        .map(|i| iter.restart_point(i))
        .collect()
}

fn write_restart_marker(
    w: &mut dyn Write,
    restarts: Vec<usize>,
    offset: usize,
) -> io::Result<()> {
    if restarts.contains(&offset) {
        writeln!(w, " [restart]")
    } else {
        writeln!(w)
    }
}

fn write_restart_array(
    w: &mut dyn Write,
    block_offset: u64,
    restarts: Vec<usize>,
    restarts_offset: usize,
) -> io::Result<()> {
    for (i, &restart) in restarts.iter().enumerate() {
        writeln!(
            w,
            "{:>10}    [restart {}]",
            block_offset + restarts_offset as u64 + 4 * i as u64,
            block_offset + restart as u64
        )?;
    }
    Ok(())
}
