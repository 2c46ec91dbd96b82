mod conversations;
mod friendships;
mod memberships;
mod messages;
mod users;
