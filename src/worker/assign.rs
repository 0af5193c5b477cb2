/// Deals `items` round-robin into at most `slots` non-empty groups.
pub(super) fn deal_round_robin<T: Clone>(items: &[T], slots: usize) -> Vec<Vec<T>> {
    let slots = slots.max(1).min(items.len().max(1));
    let mut groups: Vec<Vec<T>> = vec![Vec::new(); slots];
    for (index, item) in items.iter().enumerate() {
        if let Some(group) = groups.get_mut(index.checked_rem(slots).unwrap_or(0)) {
            group.push(item.clone());
        }
    }
    groups.retain(|group| !group.is_empty());
    groups
}
